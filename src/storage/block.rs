//! Block framing
//!
//! Every spilled group is written as one self-describing block:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────┬──────────────────────┐
//! │ HeaderLen: u32 BE (4)│ Header (tag-encoded) │ Body (tag-encoded)   │
//! └──────────────────────┴──────────────────────┴──────────────────────┘
//!
//! Header: {1: block type}{3: body length}{4: crc32 of body}
//! Body:   {1: raw bytes}
//!     or  {2: uncompressed length}{3: zlib payload}
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::config::BlockCompression;
use crate::error::{Result, SortError};
use crate::wire::{MessageReader, MessageWriter};

/// Block type written for spilled record groups
pub const BLOCK_TYPE: &str = "TempBlock";

/// Size of the big-endian header length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Upper bound on a header; real headers are a few dozen bytes
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Upper bound on a body (1 GiB)
pub const MAX_BODY_SIZE: usize = 1 << 30;

const HEADER_TYPE: u32 = 1;
const HEADER_DATASIZE: u32 = 3;
const HEADER_CRC: u32 = 4;

const BODY_RAW: u32 = 1;
const BODY_RAW_SIZE: u32 = 2;
const BODY_ZLIB: u32 = 3;

/// A decoded block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedBlock {
    pub block_type: String,
    pub data: Vec<u8>,
}

// =============================================================================
// Writing
// =============================================================================

/// Frame (and optionally compress) `data` as a complete block
pub fn frame_block(block_type: &str, data: &[u8], compression: BlockCompression) -> Result<Vec<u8>> {
    let mut body = MessageWriter::with_capacity(data.len() / 2 + 16);
    match compression {
        BlockCompression::None => body.put_bytes(BODY_RAW, data),
        BlockCompression::Zlib { level } => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder.write_all(data)?;
            let compressed = encoder.finish()?;

            body.put_varint(BODY_RAW_SIZE, data.len() as u64);
            body.put_bytes(BODY_ZLIB, &compressed);
        }
    }
    let body = body.into_vec();

    let mut header = MessageWriter::with_capacity(block_type.len() + 24);
    header.put_bytes(HEADER_TYPE, block_type.as_bytes());
    header.put_varint(HEADER_DATASIZE, body.len() as u64);
    header.put_varint(HEADER_CRC, crc32fast::hash(&body) as u64);
    let header = header.into_vec();

    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + header.len() + body.len());
    out.extend_from_slice(&(header.len() as u32).to_be_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&body);
    Ok(out)
}

// =============================================================================
// Reading
// =============================================================================

/// Read one block from the current position of `reader`
pub fn read_block<R: Read>(reader: &mut R) -> Result<FramedBlock> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;
    let header_len = u32::from_be_bytes(prefix) as usize;

    if header_len > MAX_HEADER_SIZE {
        return Err(SortError::Decode(format!(
            "Header too large: {} bytes (max {})",
            header_len, MAX_HEADER_SIZE
        )));
    }

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;

    let mut block_type = None;
    let mut body_len = None;
    let mut expected_crc = None;
    for field in MessageReader::new(&header) {
        let field = field?;
        match field.tag {
            HEADER_TYPE => {
                let raw = field.as_bytes()?;
                let name = std::str::from_utf8(raw)
                    .map_err(|e| SortError::Decode(format!("block type is not utf-8: {}", e)))?;
                block_type = Some(name.to_string());
            }
            HEADER_DATASIZE => body_len = Some(field.as_varint()? as usize),
            HEADER_CRC => expected_crc = Some(field.as_varint()? as u32),
            _ => {}
        }
    }

    let block_type =
        block_type.ok_or_else(|| SortError::Decode("header missing block type".to_string()))?;
    let body_len =
        body_len.ok_or_else(|| SortError::Decode("header missing body length".to_string()))?;

    if body_len > MAX_BODY_SIZE {
        return Err(SortError::Decode(format!(
            "Body too large: {} bytes (max {})",
            body_len, MAX_BODY_SIZE
        )));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body)?;

    if let Some(expected) = expected_crc {
        let actual = crc32fast::hash(&body);
        if actual != expected {
            return Err(SortError::Decode(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                expected, actual
            )));
        }
    }

    let data = decode_body(&body)?;
    Ok(FramedBlock { block_type, data })
}

fn decode_body(body: &[u8]) -> Result<Vec<u8>> {
    let mut raw = None;
    let mut raw_size = None;
    let mut zlib = None;

    for field in MessageReader::new(body) {
        let field = field?;
        match field.tag {
            BODY_RAW => raw = Some(field.as_bytes()?),
            BODY_RAW_SIZE => raw_size = Some(field.as_varint()? as usize),
            BODY_ZLIB => zlib = Some(field.as_bytes()?),
            _ => {}
        }
    }

    if let Some(raw) = raw {
        return Ok(raw.to_vec());
    }

    let (compressed, raw_size) = match (zlib, raw_size) {
        (Some(c), Some(n)) => (c, n),
        _ => {
            return Err(SortError::Decode(
                "body has neither raw nor zlib data".to_string(),
            ))
        }
    };

    if raw_size > MAX_BODY_SIZE {
        return Err(SortError::Decode(format!(
            "Uncompressed size too large: {} bytes (max {})",
            raw_size, MAX_BODY_SIZE
        )));
    }

    let mut data = Vec::with_capacity(raw_size);
    ZlibDecoder::new(compressed).read_to_end(&mut data)?;

    if data.len() != raw_size {
        return Err(SortError::Decode(format!(
            "zlib body inflated to {} bytes, header says {}",
            data.len(),
            raw_size
        )));
    }

    Ok(data)
}
