use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use crate::hpack::HeaderField;

/// Entries 1..=61 of the RFC 7541 Appendix A static table.
pub const STATIC_TABLE: [(&[u8], &[u8]); 61] = [
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

pub const STATIC_TABLE_LEN: usize = STATIC_TABLE.len();

/// Fetches static table entry `index`, 1-based.
pub fn get_static(index: usize) -> HeaderField {
    let (name, value) = STATIC_TABLE[index - 1];
    HeaderField::new(Bytes::from_static(name), Bytes::from_static(value))
}

fn static_index() -> &'static HashMap<&'static [u8], Vec<(usize, &'static [u8])>> {
    static INDEX: OnceLock<HashMap<&'static [u8], Vec<(usize, &'static [u8])>>> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut map: HashMap<&'static [u8], Vec<(usize, &'static [u8])>> = HashMap::new();
        for (i, (name, value)) in STATIC_TABLE.iter().enumerate() {
            map.entry(name).or_default().push((i + 1, value));
        }
        map
    })
}

/// Reverse lookup into the static table: `(index, value_matched)`.
pub fn find_static(field: &HeaderField) -> Option<(usize, bool)> {
    let candidates = static_index().get(&field.name()[..])?;

    for &(index, value) in candidates {
        if value == &field.value()[..] {
            return Some((index, true));
        }
    }

    Some((candidates[0].0, false))
}

/// The HPACK dynamic table: a FIFO of header fields, newest first, bounded by
/// a byte capacity under the name+value+32 size rule.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    capacity: usize,
}

impl DynamicTable {
    pub fn new(capacity: usize) -> DynamicTable {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            capacity,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetches entry `index`, 1-based from the most recent addition.
    pub fn get(&self, index: usize) -> Option<&HeaderField> {
        if index == 0 {
            return None;
        }
        self.entries.get(index - 1)
    }

    /// Adds an entry, evicting from the oldest end until it fits. An entry
    /// larger than the whole capacity empties the table and is not inserted.
    pub fn add(&mut self, entry: HeaderField) {
        let entry_size = entry.size();

        while self.size + entry_size > self.capacity {
            match self.entries.pop_back() {
                Some(evicted) => {
                    tracing::trace!("hpack table evict; size={}", evicted.size());
                    self.size -= evicted.size();
                }
                None => {
                    debug_assert_eq!(self.size, 0);
                    return;
                }
            }
        }

        self.size += entry_size;
        self.entries.push_front(entry);
    }

    /// Applies a new capacity, evicting oldest entries until the table fits.
    pub fn set_capacity(&mut self, capacity: usize) {
        tracing::trace!(
            "hpack table capacity {} -> {}; size={}",
            self.capacity,
            capacity,
            self.size
        );
        self.capacity = capacity;

        while self.size > self.capacity {
            let evicted = self
                .entries
                .pop_back()
                .expect("table size non-zero with no entries");
            self.size -= evicted.size();
        }
    }

    /// Reverse lookup: `(index_from_newest, value_matched)`, 1-based.
    pub fn find(&self, field: &HeaderField) -> Option<(usize, bool)> {
        let mut name_only = None;

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name() == field.name() {
                if entry.value() == field.value() {
                    return Some((i + 1, true));
                }
                if name_only.is_none() {
                    name_only = Some((i + 1, false));
                }
            }
        }

        name_only
    }
}
