//! Record codec
//!
//! Packing and unpacking of single records and keyed record groups.
//!
//! ## Wire Format
//!
//! ### Record
//! ```text
//! ┌──────────────────────────┬──────────────────────────────┐
//! │ tag 1: zigzag varint key │ tag 3: len-prefixed data     │
//! └──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ### Group
//! ```text
//! ┌────────────────────────────────┬─────────────────────────┬─────┐
//! │ tag 1: zigzag varint group key │ tag 2: nested Record    │ ... │
//! └────────────────────────────────┴─────────────────────────┴─────┘
//! ```

use crate::error::{Result, SortError};
use crate::record::Record;

use super::message::{varint_len, zigzag, MessageReader, MessageWriter};

const RECORD_KEY: u32 = 1;
const RECORD_DATA: u32 = 3;

const GROUP_KEY: u32 = 1;
const GROUP_RECORD: u32 = 2;

// =============================================================================
// Records
// =============================================================================

/// Exact encoded size of a record message
fn record_len(record: &Record) -> usize {
    let data_len = record.data.len();
    1 + varint_len(zigzag(record.key)) + 1 + varint_len(data_len as u64) + data_len
}

fn write_record(writer: &mut MessageWriter, record: &Record) {
    writer.put_zigzag(RECORD_KEY, record.key);
    writer.put_bytes(RECORD_DATA, &record.data);
}

/// Encode one record
pub fn pack_record(record: &Record) -> Vec<u8> {
    let mut writer = MessageWriter::with_capacity(record_len(record));
    write_record(&mut writer, record);
    writer.into_vec()
}

/// Decode one record. Missing fields default to key 0 / empty data.
pub fn unpack_record(bytes: &[u8]) -> Result<Record> {
    let mut record = Record::new(0, Vec::new());

    for field in MessageReader::new(bytes) {
        let field = field?;
        match field.tag {
            RECORD_KEY => record.key = field.as_zigzag()?,
            RECORD_DATA => record.data = field.as_bytes()?.to_vec(),
            _ => {}
        }
    }

    Ok(record)
}

// =============================================================================
// Groups
// =============================================================================

/// Encode a keyed group of records
pub fn pack_group(key: i64, records: &[Record]) -> Vec<u8> {
    let body_len: usize = records
        .iter()
        .map(|r| {
            let len = record_len(r);
            1 + varint_len(len as u64) + len
        })
        .sum();

    let mut writer = MessageWriter::with_capacity(1 + varint_len(zigzag(key)) + body_len);
    writer.put_zigzag(GROUP_KEY, key);

    for record in records {
        writer.put_bytes(GROUP_RECORD, &pack_record(record));
    }

    writer.into_vec()
}

/// Decode a keyed group of records
pub fn unpack_group(bytes: &[u8]) -> Result<(i64, Vec<Record>)> {
    let mut key = None;
    let mut records = Vec::new();

    for field in MessageReader::new(bytes) {
        let field = field?;
        match field.tag {
            GROUP_KEY => key = Some(field.as_zigzag()?),
            GROUP_RECORD => records.push(unpack_record(field.as_bytes()?)?),
            _ => {}
        }
    }

    let key = key.ok_or_else(|| SortError::Decode("group without key".to_string()))?;
    Ok((key, records))
}
