//! Tests for the allocation routers
//!
//! These tests verify:
//! - Ascending iteration with contiguous emit indexes
//! - Record conservation in every store mode
//! - Regrouping of coarse buckets into fine keys
//! - Freezing after the first iteration
//! - Store cleanup on finish
//! - Buckets that spill several times in each disk mode
//! - Writer threads stay bounded with thousands of shards

use std::collections::BTreeMap;
use std::sync::Arc;

use blocksort::bucket::{Bucket, MemBucket};
use blocksort::config::BlockCompression;
use blocksort::router::{make_alloc_block_store, AllocRouter, BucketFactory, RegroupRouter, Router};
use blocksort::storage::{BlockStore, DiskWriter, ShardLocs};
use blocksort::{Config, Record, SortError, StoreMode};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Deterministic linear congruential generator
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn mem_factory() -> BucketFactory {
    Box::new(|_| Box::new(MemBucket::new()))
}

fn config_for(mode: StoreMode, dir: &TempDir) -> Config {
    Config::builder()
        .store_mode(mode)
        .temp_dir(dir.path())
        .build()
}

fn random_records(count: usize, keys: u64, seed: u64) -> Vec<Record> {
    let mut rng = Lcg(seed);
    (0..count)
        .map(|i| Record::new((rng.next() % keys) as i64, (i as u32).to_le_bytes().to_vec()))
        .collect()
}

fn reference(records: &[Record]) -> BTreeMap<i64, Vec<Vec<u8>>> {
    let mut map: BTreeMap<i64, Vec<Vec<u8>>> = BTreeMap::new();
    for r in records {
        map.entry(r.key).or_default().push(r.data.clone());
    }
    for payloads in map.values_mut() {
        payloads.sort();
    }
    map
}

/// Records of `payload_len` bytes, `per_key` for each key, payloads unique
fn bulky_records(keys: &[i64], per_key: usize, payload_len: usize) -> Vec<Record> {
    let mut records = Vec::with_capacity(keys.len() * per_key);
    let mut id = 0u32;
    for _ in 0..per_key {
        for &key in keys {
            let data: Vec<u8> = id.to_le_bytes().iter().copied().cycle().take(payload_len).collect();
            records.push(Record::new(key, data));
            id += 1;
        }
    }
    records
}

/// Blocks recorded for bucket `key` across a location snapshot
fn fragments(shards: &[ShardLocs], key: i64) -> usize {
    shards
        .iter()
        .flat_map(|shard| shard.locs.iter())
        .filter(|(k, _)| *k == key)
        .map(|(_, offsets)| offsets.len())
        .sum()
}

/// Live threads in this process, where the platform reports it
fn thread_count() -> Option<usize> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|count| count.trim().parse().ok())
}

/// Drain a router's iterator into `key → sorted payloads`, checking order
fn collect(router: &dyn AllocRouter) -> BTreeMap<i64, Vec<Vec<u8>>> {
    let mut out = BTreeMap::new();
    let mut last_key = None;

    for (expected_index, item) in router.iter().enumerate() {
        let item = item.unwrap();
        assert_eq!(item.index, expected_index);
        if let Some(last) = last_key {
            assert!(item.key > last, "{} emitted after {}", item.key, last);
        }
        last_key = Some(item.key);

        let records = item.records().unwrap();
        assert_eq!(records.len(), item.len());
        let mut payloads: Vec<Vec<u8>> = records
            .iter()
            .map(|r| {
                assert_eq!(r.key, item.key);
                r.data.clone()
            })
            .collect();
        payloads.sort();
        out.insert(item.key, payloads);
    }

    out
}

// =============================================================================
// Plain Router Tests
// =============================================================================

#[test]
fn test_in_memory_order_and_lengths() {
    let mut router = Router::in_memory();
    for key in [5i64, 5, 3, 9, 3] {
        router.add(Record::new(key, vec![key as u8])).unwrap();
    }
    router.flush().unwrap();

    let seen: Vec<(i64, usize, usize)> = router
        .iter()
        .map(|item| {
            let item = item.unwrap();
            (item.key, item.index, item.len())
        })
        .collect();

    assert_eq!(seen, vec![(3, 0, 2), (5, 1, 2), (9, 2, 1)]);
    assert_eq!(router.num_blocks(), 3);
    assert_eq!(router.total_len(), 5);
}

#[test]
fn test_negative_keys_sort_first() {
    let mut router = Router::in_memory();
    for key in [0i64, -5, 3, -1, i64::MIN, i64::MAX] {
        router.add(Record::new(key, Vec::new())).unwrap();
    }

    let keys: Vec<i64> = router.iter().map(|item| item.unwrap().key).collect();
    assert_eq!(keys, vec![i64::MIN, -5, -1, 0, 3, i64::MAX]);
}

#[test]
fn test_grouped_router_uses_floor_division() {
    let mut router = Router::new(10, mem_factory(), None).unwrap();

    for key in [-11i64, -10, -1, 0, 9, 10] {
        router.add(Record::new(key, Vec::new())).unwrap();
    }

    let groups: Vec<(i64, usize)> = router
        .iter()
        .map(|item| {
            let item = item.unwrap();
            (item.key, item.len())
        })
        .collect();
    assert_eq!(groups, vec![(-2, 1), (-1, 2), (0, 2), (1, 1)]);
}

#[test]
fn test_in_memory_matches_ungrouped_router() {
    let records = random_records(400, 30, 11);
    let mut preset = Router::in_memory();
    let mut custom = Router::new(1, mem_factory(), None).unwrap();
    for r in &records {
        preset.add(r.clone()).unwrap();
        custom.add(r.clone()).unwrap();
    }

    assert_eq!(preset.group_size(), 1);
    assert_eq!(preset.total_len(), custom.total_len());
    assert_eq!(collect(&preset), collect(&custom));
    assert!(preset.locations().unwrap().is_empty());
    preset.finish().unwrap();
}

#[test]
fn test_invalid_group_size() {
    assert!(matches!(Router::new(0, mem_factory(), None), Err(SortError::Config(_))));
}

#[test]
fn test_add_after_iter_fails() {
    let mut router = Router::in_memory();
    router.add(Record::new(1, vec![1])).unwrap();
    let _ = router.iter().count();

    let err = router.add(Record::new(2, vec![2])).unwrap_err();
    assert!(matches!(err, SortError::WriteAfterRead { key: 2 }));
}

#[test]
fn test_empty_router() {
    let router = Router::in_memory();
    assert_eq!(router.iter().count(), 0);
    assert!(router.locations().unwrap().is_empty());
}

#[test]
fn test_disk_router_spills_and_cleans_up() {
    let temp = TempDir::new().unwrap();
    let writer = Arc::new(DiskWriter::create(temp.path(), BlockCompression::None).unwrap());
    let path = writer.path().to_path_buf();
    let mut router = Router::with_store(writer.clone(), 64, 1).unwrap();

    let records = random_records(500, 20, 7);
    for r in &records {
        router.add(r.clone()).unwrap();
    }
    router.flush().unwrap();

    assert_eq!(collect(&router), reference(&records));
    assert!(writer.fragment_count(0).unwrap() > 1);
    assert!(!router.locations().unwrap().is_empty());

    router.finish().unwrap();
    assert!(!path.exists());
    router.finish().unwrap();
}

// =============================================================================
// Regroup Router Tests
// =============================================================================

#[test]
fn test_regroup_splits_coarse_buckets() {
    let mut router = RegroupRouter::new(Router::new(4, mem_factory(), None).unwrap());

    for key in [7i64, 1, 3, 1, 5, 0, 12, -2] {
        router.add(Record::new(key, vec![key as u8])).unwrap();
    }
    router.flush().unwrap();

    // Coarse groups: -1 {-2}, 0 {0,1,3}, 1 {5,7}, 3 {12}
    assert_eq!(router.num_blocks(), 4);

    let seen: Vec<(i64, usize, usize)> = router
        .iter()
        .map(|item| {
            let item = item.unwrap();
            (item.key, item.index, item.len())
        })
        .collect();
    assert_eq!(
        seen,
        vec![
            (-2, 0, 1),
            (0, 1, 1),
            (1, 2, 2),
            (3, 3, 1),
            (5, 4, 1),
            (7, 5, 1),
            (12, 6, 1),
        ]
    );
}

#[test]
fn test_regroup_detects_misplaced_record() {
    // A bucket factory that ignores the allocation key lets a record land
    // in the wrong coarse group
    let factory: BucketFactory = Box::new(|_key: i64| {
        let mut bucket = MemBucket::new();
        bucket.add(Record::new(99, Vec::new())).unwrap();
        Box::new(bucket) as Box<dyn Bucket>
    });
    let mut router = RegroupRouter::new(Router::new(10, factory, None).unwrap());
    router.add(Record::new(1, Vec::new())).unwrap();

    let err = router.iter().find_map(|item| item.err()).unwrap();
    assert!(matches!(err, SortError::KeyMismatch { expected: 0, found: 9 }));
}

// =============================================================================
// Store Mode Tests
// =============================================================================

#[test]
fn test_tempfileslim_uniform_keys() {
    let temp = TempDir::new().unwrap();
    let mut router = make_alloc_block_store(&config_for(StoreMode::TempFileSlim, &temp)).unwrap();

    let records = random_records(10_000, 1000, 42);
    for r in &records {
        router.add(r.clone()).unwrap();
    }
    router.flush().unwrap();

    let expected = reference(&records);
    assert_eq!(expected.len(), 1000);
    assert_eq!(collect(router.as_ref()), expected);

    router.finish().unwrap();
}

#[test]
fn test_conservation_in_every_mode() {
    for mode in StoreMode::ALL {
        let temp = TempDir::new().unwrap();
        let mut router = make_alloc_block_store(&config_for(mode, &temp)).unwrap();

        // Keys straddle zero; buckets stay below every spill target
        let records: Vec<Record> = random_records(3_000, 1500, mode as u64 + 1)
            .into_iter()
            .map(|r| Record::new(r.key - 700, r.data.repeat(64)))
            .collect();
        for r in &records {
            router.add(r.clone()).unwrap();
        }
        router.flush().unwrap();

        assert_eq!(router.total_len(), records.len(), "mode {}", mode);
        assert_eq!(collect(router.as_ref()), reference(&records), "mode {}", mode);

        router.finish().unwrap();
        let leftovers = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 0, "mode {} left spill files behind", mode);
    }
}

#[test]
fn test_block_mode_has_no_locations() {
    let temp = TempDir::new().unwrap();
    let mut router = make_alloc_block_store(&config_for(StoreMode::Block, &temp)).unwrap();
    router.add(Record::new(1, vec![1])).unwrap();

    assert!(router.locations().unwrap().is_empty());
    router.finish().unwrap();
}

// =============================================================================
// Spill Tests
// =============================================================================

/// Fill `mode` with `records`, check each listed bucket spilled at least
/// `min_fragments` blocks, then check the output against the input
fn check_repeated_spills(mode: StoreMode, records: &[Record], buckets: &[i64], min_fragments: usize) {
    let temp = TempDir::new().unwrap();
    let mut router = make_alloc_block_store(&config_for(mode, &temp)).unwrap();

    for r in records {
        router.add(r.clone()).unwrap();
    }
    router.flush().unwrap();

    let shards = router.locations().unwrap();
    for &bucket in buckets {
        let count = fragments(&shards, bucket);
        assert!(
            count >= min_fragments,
            "mode {}: bucket {} has {} fragments",
            mode,
            bucket,
            count
        );
    }

    assert_eq!(router.total_len(), records.len(), "mode {}", mode);
    assert_eq!(collect(router.as_ref()), reference(records), "mode {}", mode);

    router.finish().unwrap();
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0, "mode {}", mode);
}

#[test]
fn test_tempfile_spills_repeatedly() {
    // 600 x 420 estimated bytes per key against a 64 KiB target
    let keys = [-3i64, 0, 1, 42];
    let records = bulky_records(&keys, 600, 400);
    check_repeated_spills(StoreMode::TempFile, &records, &keys, 3);
}

#[test]
fn test_tempfileslim_spills_repeatedly() {
    // Keys in shards -1, 0, 1 and 3
    let keys = [-1i64, 0, 1, 700, 1500];
    let records = bulky_records(&keys, 600, 400);
    check_repeated_spills(StoreMode::TempFileSlim, &records, &keys, 3);
}

#[test]
fn test_tempfilesplit_spills_repeatedly() {
    // About 5 MB in coarse group 0 against a 2 MiB target
    let keys: Vec<i64> = (0..500).collect();
    let records = bulky_records(&keys, 24, 400);
    check_repeated_spills(StoreMode::TempFileSplit, &records, &[0], 3);
}

// =============================================================================
// Resource Bound Tests
// =============================================================================

#[test]
fn test_tempfileslim_sparse_keys_bound_threads() {
    const KEYS: i64 = 2000;

    let before = thread_count();
    let temp = TempDir::new().unwrap();
    let mut router = make_alloc_block_store(&config_for(StoreMode::TempFileSlim, &temp)).unwrap();

    // One shard per record
    let records: Vec<Record> = (0..KEYS).map(|i| Record::new(i * 500, vec![i as u8; 100])).collect();
    for r in &records {
        router.add(r.clone()).unwrap();
    }
    router.flush().unwrap();
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), KEYS as usize);

    if let (Some(before), Some(during)) = (before, thread_count()) {
        assert!(
            during < before + 200,
            "thread count grew from {} to {} with {} shards",
            before,
            during,
            KEYS
        );
    }

    assert_eq!(router.locations().unwrap().len(), KEYS as usize);
    assert_eq!(collect(router.as_ref()), reference(&records));

    router.finish().unwrap();
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}
