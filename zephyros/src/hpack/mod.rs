mod decoder;
mod encoder;
pub(crate) mod header;
pub(crate) mod huffman;
pub(crate) mod integer;
pub(crate) mod table;

pub use decoder::{Decoder, DecoderError, ListValidator, ValidationError};
pub use encoder::Encoder;
pub use header::{FieldKind, HeaderField, HeaderList};
pub use huffman::HuffmanError;
pub use integer::IntegerError;
