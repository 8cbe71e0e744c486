pub mod parse;
pub mod record;

pub use self::parse::{decode_binary, encode_binary, encode_text, DecodeError, Decoded, Decoder};
pub use self::record::{Record, TextRecord, WireFormat, BINARY_LEN};
