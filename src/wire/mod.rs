//! Wire Module
//!
//! Binary framing for records and record groups.
//!
//! ## Responsibilities
//! - Varint / zigzag primitives
//! - Tag-encoded message writer and zero-copy reader
//! - Pack/unpack of a single record and of a keyed record group
//!
//! The same message layout is reused by the block headers in
//! [`crate::storage`].

mod codec;
mod message;

pub use codec::{pack_group, pack_record, unpack_group, unpack_record};
pub use message::{
    decode_varint, encode_varint, unzigzag, varint_len, zigzag, Field, FieldValue,
    MessageReader, MessageWriter, WireType,
};
