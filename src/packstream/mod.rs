//! PackStream binary value codec.
//!
//! PackStream is the serialization format carried inside every Bolt message.
//! It is a self-describing format: each value starts with a marker byte that
//! names its type and, for sized types, either embeds the size in the low
//! nibble ("tiny" forms) or announces a big-endian size prefix.
//!
//! # Binary Format
//!
//! | marker          | type                                   |
//! |-----------------|----------------------------------------|
//! | `0x00..=0x7F`   | tiny integer 0..127                    |
//! | `0xF0..=0xFF`   | tiny integer -16..-1                   |
//! | `0xC8..=0xCB`   | integer, 1/2/4/8 byte big-endian body  |
//! | `0xC1`          | 8 byte IEEE754 float                   |
//! | `0xC0`          | null                                   |
//! | `0xC2`, `0xC3`  | false, true                            |
//! | `0xCC..=0xCE`   | bytes, 8/16/32 bit length              |
//! | `0x8_`, `0xD0..=0xD2` | string                           |
//! | `0x9_`, `0xD4..=0xD6` | list                             |
//! | `0xA_`, `0xD8..=0xDA` | map                              |
//! | `0xB_`          | structure, followed by a signature byte|
//!
//! The codec knows nothing about graphs or messages. Anything domain specific,
//! such as turning a node-shaped map into a node structure, happens before a
//! value reaches [`encode`].
mod decode;
mod encode;
mod value;

use thiserror::Error;

pub use decode::{decode, decode_exact};
pub use encode::{check_encodable, encode, encode_into};
pub use value::{Map, Structure, Value};

pub(crate) mod marker {
    pub(crate) const TINY_STRING: u8 = 0x80;
    pub(crate) const TINY_LIST: u8 = 0x90;
    pub(crate) const TINY_MAP: u8 = 0xA0;
    pub(crate) const TINY_STRUCT: u8 = 0xB0;

    pub(crate) const NULL: u8 = 0xC0;
    pub(crate) const FLOAT_64: u8 = 0xC1;
    pub(crate) const FALSE: u8 = 0xC2;
    pub(crate) const TRUE: u8 = 0xC3;

    pub(crate) const INT_8: u8 = 0xC8;
    pub(crate) const INT_16: u8 = 0xC9;
    pub(crate) const INT_32: u8 = 0xCA;
    pub(crate) const INT_64: u8 = 0xCB;

    pub(crate) const BYTES_8: u8 = 0xCC;
    pub(crate) const BYTES_16: u8 = 0xCD;
    pub(crate) const BYTES_32: u8 = 0xCE;

    pub(crate) const STRING_8: u8 = 0xD0;
    pub(crate) const STRING_16: u8 = 0xD1;
    pub(crate) const STRING_32: u8 = 0xD2;

    pub(crate) const LIST_8: u8 = 0xD4;
    pub(crate) const LIST_16: u8 = 0xD5;
    pub(crate) const LIST_32: u8 = 0xD6;

    pub(crate) const MAP_8: u8 = 0xD8;
    pub(crate) const MAP_16: u8 = 0xD9;
    pub(crate) const MAP_32: u8 = 0xDA;
}

/// Largest number of fields a structure marker can announce.
pub const MAX_STRUCT_FIELDS: usize = 15;

/// Collections nested deeper than this are rejected while decoding.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackStreamError {
    #[error("malformed value: truncated {what} at offset {offset}")]
    Truncated { what: &'static str, offset: usize },

    #[error("malformed value: unknown marker 0x{marker:02X} at offset {offset}")]
    UnknownMarker { marker: u8, offset: usize },

    #[error("malformed value: string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("malformed value: map key at offset {offset} is not a string")]
    NonStringKey { offset: usize },

    #[error("malformed value: nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("malformed value: {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("structure 0x{signature:02X} has {fields} fields, at most {MAX_STRUCT_FIELDS} fit")]
    TooManyFields { signature: u8, fields: usize },
}
