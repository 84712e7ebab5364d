//! Tests for the record wire format
//!
//! These tests verify:
//! - Exact byte layout of packed records and groups
//! - Group round-trip with negative keys and empty payloads
//! - Tolerance of unknown fields
//! - Rejection of truncated and malformed input

use blocksort::wire::{pack_group, pack_record, unpack_group, unpack_record, MessageWriter};
use blocksort::{Record, SortError};

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_records() -> Vec<Record> {
    vec![
        Record::new(-7, b"node".to_vec()),
        Record::new(-7, Vec::new()),
        Record::new(-7, vec![0u8; 300]),
    ]
}

// =============================================================================
// Record Layout Tests
// =============================================================================

#[test]
fn test_record_byte_layout() {
    let packed = pack_record(&Record::new(-1, b"ab".to_vec()));

    // {1: zigzag(-1) = 1}{3: len 2, "ab"}
    assert_eq!(packed, vec![0x08, 0x01, 0x1A, 0x02, b'a', b'b']);
}

#[test]
fn test_record_large_key() {
    let record = Record::new(i64::MIN, b"x".to_vec());
    let unpacked = unpack_record(&pack_record(&record)).unwrap();
    assert_eq!(unpacked, record);
}

#[test]
fn test_record_skips_unknown_fields() {
    let mut writer = MessageWriter::new();
    writer.put_zigzag(1, 42);
    writer.put_varint(9, 12345);
    writer.put_bytes(3, b"payload");
    writer.put_bytes(15, b"ignored");

    let record = unpack_record(&writer.into_vec()).unwrap();
    assert_eq!(record, Record::new(42, b"payload".to_vec()));
}

#[test]
fn test_record_missing_fields_default() {
    let record = unpack_record(&[]).unwrap();
    assert_eq!(record, Record::new(0, Vec::new()));
}

// =============================================================================
// Group Tests
// =============================================================================

#[test]
fn test_group_roundtrip_preserves_order() {
    let records = sample_records();
    let packed = pack_group(-7, &records);

    let (key, unpacked) = unpack_group(&packed).unwrap();
    assert_eq!(key, -7);
    assert_eq!(unpacked, records);
}

#[test]
fn test_empty_group() {
    let (key, records) = unpack_group(&pack_group(12, &[])).unwrap();
    assert_eq!(key, 12);
    assert!(records.is_empty());
}

#[test]
fn test_group_starts_with_key_field() {
    let packed = pack_group(3, &[Record::new(3, b"a".to_vec())]);

    // {1: zigzag(3) = 6}{2: nested record}
    assert_eq!(&packed[..3], &[0x08, 0x06, 0x12]);
}

#[test]
fn test_group_without_key_is_rejected() {
    let mut writer = MessageWriter::new();
    writer.put_bytes(2, &pack_record(&Record::new(1, b"a".to_vec())));

    let err = unpack_group(&writer.into_vec()).unwrap_err();
    assert!(matches!(err, SortError::Decode(_)));
    assert!(err.is_integrity());
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_truncated_group_fails() {
    let packed = pack_group(5, &sample_records());
    let truncated = &packed[..packed.len() - 10];

    assert!(matches!(unpack_group(truncated), Err(SortError::Decode(_))));
}

#[test]
fn test_unsupported_wire_type_fails() {
    // tag 1, wire type 5 (fixed32) is not part of the format
    let bytes = [0x0D, 0x00, 0x00, 0x00, 0x00];
    assert!(unpack_record(&bytes).is_err());
}
