mod table;

use bytes::{BufMut, BytesMut};
use std::sync::OnceLock;

use self::table::CODES;

const EOS: usize = 256;

/// Failures while decoding a Huffman-coded string literal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HuffmanError {
    /// A bit sequence that is not a prefix of any code.
    InvalidCode,
    /// The EOS symbol appeared inside the string.
    UnexpectedEos,
    /// Final padding longer than seven bits, or not all ones.
    InvalidPadding,
}

/// Encodes `src` with the static Huffman code, padding the final octet with
/// the EOS-prefix ones.
pub fn encode<B: BufMut>(src: &[u8], dst: &mut B) {
    let mut bits: u64 = 0;
    let mut bits_left: u32 = 40;

    for &byte in src {
        let (code, nbits) = CODES[byte as usize];

        bits |= (code as u64) << (bits_left - nbits as u32);
        bits_left -= nbits as u32;

        while bits_left <= 32 {
            dst.put_u8((bits >> 32) as u8);
            bits <<= 8;
            bits_left += 8;
        }
    }

    if bits_left != 40 {
        bits |= (1 << bits_left) - 1;
        dst.put_u8((bits >> 32) as u8);
    }
}

/// The octet length `encode` would produce for `src`:
/// ceil(sum of symbol bit lengths / 8).
pub fn encoded_len(src: &[u8]) -> usize {
    let bits: usize = src.iter().map(|&b| CODES[b as usize].1 as usize).sum();
    (bits + 7) / 8
}

/// Decodes a Huffman-coded string by walking the code tree bit by bit.
///
/// Accepts only the canonical padding: at most seven trailing bits, all ones
/// (a strict prefix of the EOS code). The EOS symbol itself never appears in
/// a well-formed string.
pub fn decode(src: &[u8], buf: &mut BytesMut) -> Result<BytesMut, HuffmanError> {
    let tree = decode_tree();

    buf.reserve(src.len() << 1);

    let mut node = 0usize;
    let mut bits_since_symbol = 0u32;

    for &byte in src {
        for shift in (0..8).rev() {
            let bit = ((byte >> shift) & 1) as usize;

            node = match tree.nodes[node].next[bit] {
                Some(next) => next.get(),
                None => return Err(HuffmanError::InvalidCode),
            };

            match tree.nodes[node].symbol {
                Some(EOS) => return Err(HuffmanError::UnexpectedEos),
                Some(symbol) => {
                    buf.put_u8(symbol as u8);
                    node = 0;
                    bits_since_symbol = 0;
                }
                None => bits_since_symbol += 1,
            }
        }
    }

    // Trailing bits are legal only as a ≤7-bit prefix of the EOS code, which
    // is all ones; any zero in the padding leaves the EOS path.
    if node != 0 && (bits_since_symbol > 7 || !tree.nodes[node].on_eos_path) {
        return Err(HuffmanError::InvalidPadding);
    }

    Ok(buf.split())
}

struct DecodeTree {
    nodes: Vec<Node>,
}

#[derive(Clone, Copy, Default)]
struct Node {
    next: [Option<std::num::NonZeroUsize>; 2],
    symbol: Option<usize>,
    /// Whether this node lies on the all-ones EOS prefix, the only legal
    /// resting place for padding.
    on_eos_path: bool,
}

fn decode_tree() -> &'static DecodeTree {
    static TREE: OnceLock<DecodeTree> = OnceLock::new();
    TREE.get_or_init(build_decode_tree)
}

fn build_decode_tree() -> DecodeTree {
    let mut nodes = vec![Node::default()];

    for (symbol, &(code, nbits)) in CODES.iter().enumerate() {
        let mut node = 0usize;

        for shift in (0..nbits).rev() {
            let bit = ((code >> shift) & 1) as usize;

            node = match nodes[node].next[bit] {
                Some(next) => next.get(),
                None => {
                    nodes.push(Node::default());
                    let next = nodes.len() - 1;
                    nodes[node].next[bit] = std::num::NonZeroUsize::new(next);
                    next
                }
            };
        }

        nodes[node].symbol = Some(symbol);
    }

    // Mark the all-ones walk toward EOS; interior stops on it are valid pads.
    let (eos_code, eos_bits) = CODES[EOS];
    let mut node = 0usize;
    for shift in (0..eos_bits).rev() {
        let bit = ((eos_code >> shift) & 1) as usize;
        node = nodes[node].next[bit].expect("EOS path exists").get();
        nodes[node].on_eos_path = true;
    }

    DecodeTree { nodes }
}
