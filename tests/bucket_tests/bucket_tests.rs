//! Tests for MemBucket and DiskBucket
//!
//! These tests verify:
//! - Every added record is returned exactly once
//! - Disk buckets spill once the target size is exceeded
//! - Spilled fragments and the pending tail are merged on read
//! - Groups filed under the wrong key are reported as integrity errors

use std::collections::HashMap;
use std::sync::Arc;

use blocksort::bucket::{Bucket, DiskBucket, MemBucket, RECORD_OVERHEAD};
use blocksort::config::BlockCompression;
use blocksort::storage::{BlockStore, DiskWriter};
use blocksort::wire::pack_group;
use blocksort::{Record, SortError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> (TempDir, Arc<DiskWriter>) {
    let temp_dir = TempDir::new().unwrap();
    let writer = DiskWriter::create(temp_dir.path(), BlockCompression::Zlib { level: 6 }).unwrap();
    (temp_dir, Arc::new(writer))
}

fn record(key: i64, tag: u8, size: usize) -> Record {
    Record::new(key, vec![tag; size])
}

fn counts(records: &[Record]) -> HashMap<Vec<u8>, usize> {
    let mut map = HashMap::new();
    for r in records {
        *map.entry(r.data.clone()).or_insert(0) += 1;
    }
    map
}

// =============================================================================
// MemBucket Tests
// =============================================================================

#[test]
fn test_mem_bucket_returns_records_in_insertion_order() {
    let mut bucket = MemBucket::new();
    assert!(bucket.is_empty());

    for i in 0..5u8 {
        bucket.add(record(1, i, 4)).unwrap();
    }
    bucket.flush().unwrap();

    assert_eq!(bucket.len(), 5);
    let all = bucket.all().unwrap();
    let tags: Vec<u8> = all.iter().map(|r| r.data[0]).collect();
    assert_eq!(tags, vec![0, 1, 2, 3, 4]);
}

// =============================================================================
// DiskBucket Tests
// =============================================================================

#[test]
fn test_disk_bucket_two_spills_plus_tail() {
    let (_temp, writer) = setup_store();
    let store: Arc<dyn BlockStore> = writer.clone();
    let mut bucket = DiskBucket::new(42, store, 100);

    // Each record counts 60 + RECORD_OVERHEAD = 80 bytes: every second add
    // crosses the 100 byte target
    assert_eq!(RECORD_OVERHEAD, 20);
    for i in 0..5u8 {
        bucket.add(record(42, i, 60)).unwrap();
    }

    assert_eq!(bucket.len(), 5);
    assert_eq!(bucket.pending_len(), 1);
    assert_eq!(writer.fragment_count(42).unwrap(), 2);

    let all = bucket.all().unwrap();
    assert_eq!(all.len(), 5);
    let expected: Vec<Record> = (0..5u8).map(|i| record(42, i, 60)).collect();
    assert_eq!(counts(&all), counts(&expected));
}

#[test]
fn test_disk_bucket_below_target_stays_in_memory() {
    let (_temp, writer) = setup_store();
    let mut bucket = DiskBucket::new(7, writer.clone(), 1024);

    bucket.add(record(7, 1, 10)).unwrap();
    bucket.add(record(7, 2, 10)).unwrap();

    assert_eq!(bucket.pending_len(), 2);
    assert_eq!(writer.fragment_count(7).unwrap(), 0);
    assert_eq!(bucket.all().unwrap().len(), 2);
}

#[test]
fn test_disk_bucket_explicit_flush() {
    let (_temp, writer) = setup_store();
    let mut bucket = DiskBucket::new(-3, writer.clone(), 1 << 20);

    for i in 0..10u8 {
        bucket.add(record(-3, i, 8)).unwrap();
    }
    bucket.flush().unwrap();
    // Flushing an empty buffer writes nothing
    bucket.flush().unwrap();

    assert_eq!(bucket.pending_len(), 0);
    assert_eq!(writer.fragment_count(-3).unwrap(), 1);

    let all = bucket.all().unwrap();
    assert_eq!(all.len(), 10);
    assert!(all.iter().all(|r| r.key == -3));
}

#[test]
fn test_disk_buckets_share_a_store() {
    let (_temp, writer) = setup_store();
    let mut a = DiskBucket::new(1, writer.clone(), 0);
    let mut b = DiskBucket::new(2, writer.clone(), 0);

    // A zero target spills on every add
    for i in 0..3u8 {
        a.add(record(1, i, 5)).unwrap();
        b.add(record(2, i, 5)).unwrap();
    }

    assert_eq!(writer.fragment_count(1).unwrap(), 3);
    assert_eq!(writer.fragment_count(2).unwrap(), 3);
    assert!(a.all().unwrap().iter().all(|r| r.key == 1));
    assert!(b.all().unwrap().iter().all(|r| r.key == 2));
}

#[test]
fn test_disk_bucket_detects_misfiled_group() {
    let (_temp, writer) = setup_store();

    // A group packed for key 8 but filed under key 5
    writer
        .write_block(5, pack_group(8, &[record(8, 0, 4)]))
        .unwrap();

    let bucket = DiskBucket::new(5, writer.clone(), 1024);
    let err = bucket.all().unwrap_err();

    assert!(matches!(err, SortError::KeyMismatch { expected: 5, found: 8 }));
    assert!(err.is_integrity());
}

#[test]
fn test_disk_bucket_add_after_read_fails() {
    let (_temp, writer) = setup_store();
    let mut bucket = DiskBucket::new(1, writer.clone(), 0);

    bucket.add(record(1, 0, 4)).unwrap();
    assert_eq!(bucket.all().unwrap().len(), 1);

    let err = bucket.add(record(1, 1, 4)).unwrap_err();
    assert!(matches!(err, SortError::WriteAfterRead { key: 1 }));
}
