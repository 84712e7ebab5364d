//! Tag-encoded messages
//!
//! Minimal writer/reader for the protobuf-style field layout used by records,
//! groups and block headers. Only the two wire types the engine needs are
//! supported: varint (0) and length-delimited (2).

use bytes::{Buf, BufMut};

use crate::error::{Result, SortError};

/// Field wire type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    LengthDelimited = 2,
}

// =============================================================================
// Varint / ZigZag
// =============================================================================

/// Encode an unsigned integer as a varint
pub fn encode_varint(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode a varint, failing on truncated or overlong input
pub fn decode_varint(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(SortError::Decode("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift >= 64 {
            return Err(SortError::Decode("varint too large".to_string()));
        }
    }
}

/// 0 => 0, -1 => 1, 1 => 2, -2 => 3, ...
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Number of bytes `encode_varint` will produce
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

// =============================================================================
// Writer
// =============================================================================

/// Builds a tag-encoded message
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn put_key(&mut self, tag: u32, wire_type: WireType) {
        encode_varint(&mut self.buf, ((tag as u64) << 3) | wire_type as u64);
    }

    pub fn put_varint(&mut self, tag: u32, value: u64) {
        self.put_key(tag, WireType::Varint);
        encode_varint(&mut self.buf, value);
    }

    pub fn put_zigzag(&mut self, tag: u32, value: i64) {
        self.put_varint(tag, zigzag(value));
    }

    pub fn put_bytes(&mut self, tag: u32, data: &[u8]) {
        self.put_key(tag, WireType::LengthDelimited);
        encode_varint(&mut self.buf, data.len() as u64);
        self.buf.put_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Value of a decoded field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

/// A decoded field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    pub tag: u32,
    pub value: FieldValue<'a>,
}

impl<'a> Field<'a> {
    pub fn as_varint(&self) -> Result<u64> {
        match self.value {
            FieldValue::Varint(v) => Ok(v),
            FieldValue::Bytes(_) => Err(SortError::Decode(format!(
                "field {}: expected varint, got bytes",
                self.tag
            ))),
        }
    }

    pub fn as_zigzag(&self) -> Result<i64> {
        self.as_varint().map(unzigzag)
    }

    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        match self.value {
            FieldValue::Bytes(b) => Ok(b),
            FieldValue::Varint(_) => Err(SortError::Decode(format!(
                "field {}: expected bytes, got varint",
                self.tag
            ))),
        }
    }
}

/// Iterates the fields of a message without copying
pub struct MessageReader<'a> {
    buf: &'a [u8],
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn read_field(&mut self) -> Result<Field<'a>> {
        let key = decode_varint(&mut self.buf)?;
        let tag = (key >> 3) as u32;

        let value = match key & 0x7 {
            0 => FieldValue::Varint(decode_varint(&mut self.buf)?),
            2 => {
                let len = decode_varint(&mut self.buf)? as usize;
                if len > self.buf.len() {
                    return Err(SortError::Decode(format!(
                        "field {}: length {} exceeds remaining {} bytes",
                        tag,
                        len,
                        self.buf.len()
                    )));
                }
                let (data, rest) = self.buf.split_at(len);
                self.buf = rest;
                FieldValue::Bytes(data)
            }
            other => {
                return Err(SortError::Decode(format!(
                    "field {}: unsupported wire type {}",
                    tag, other
                )))
            }
        };

        Ok(Field { tag, value })
    }
}

impl<'a> Iterator for MessageReader<'a> {
    type Item = Result<Field<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let field = self.read_field();
        if field.is_err() {
            // Stop after the first malformed field
            self.buf = &[];
        }
        Some(field)
    }
}
