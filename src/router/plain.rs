//! Plain allocation router
//!
//! Maps `key div group_size` to a lazily created bucket and replays the
//! buckets in ascending key order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bucket::{Bucket, DiskBucket, MemBucket};
use crate::error::{Result, SortError};
use crate::record::Record;
use crate::storage::{BlockStore, ShardLocs};

use super::{AllocRouter, SortedBucket, SortedIter};

/// Creates the bucket for a new allocation key
pub type BucketFactory = Box<dyn Fn(i64) -> Box<dyn Bucket> + Send + Sync>;

/// Allocation router
///
/// ## Concurrency:
/// - `add`/`flush`/`finish` take `&mut self`: exactly one ingest thread
///   mutates the map, no lock involved
/// - `iter` takes `&self` and freezes the router; later adds fail
pub struct Router {
    /// Number of consecutive keys sharing one bucket
    group_size: i64,

    /// Buckets by allocation key, ascending
    buckets: BTreeMap<i64, Box<dyn Bucket>>,

    factory: BucketFactory,

    /// Records added across all buckets
    total: usize,

    /// Set by the first `iter`
    frozen: AtomicBool,

    /// Store to finish along with the router
    store: Option<Arc<dyn BlockStore>>,
}

impl Router {
    /// Router with a custom bucket factory and optional store to clean up
    pub fn new(
        group_size: i64,
        factory: BucketFactory,
        store: Option<Arc<dyn BlockStore>>,
    ) -> Result<Self> {
        if group_size < 1 {
            return Err(SortError::Config(format!(
                "group size must be at least 1, got {}",
                group_size
            )));
        }

        Ok(Self::build(group_size, factory, store))
    }

    /// Ungrouped in-memory router
    pub fn in_memory() -> Self {
        Self::build(1, Box::new(|_| Box::new(MemBucket::new())), None)
    }

    fn build(group_size: i64, factory: BucketFactory, store: Option<Arc<dyn BlockStore>>) -> Self {
        Self {
            group_size,
            buckets: BTreeMap::new(),
            factory,
            total: 0,
            frozen: AtomicBool::new(false),
            store,
        }
    }

    /// Router whose buckets spill to `store` once they exceed
    /// `target_block_size` bytes
    pub fn with_store(
        store: Arc<dyn BlockStore>,
        target_block_size: usize,
        group_size: i64,
    ) -> Result<Self> {
        let bucket_store = Arc::clone(&store);
        let factory: BucketFactory = Box::new(move |key| {
            Box::new(DiskBucket::new(key, Arc::clone(&bucket_store), target_block_size))
        });
        Self::new(group_size, factory, Some(store))
    }

    pub fn group_size(&self) -> i64 {
        self.group_size
    }

    /// Allocation key of a record key
    pub fn alloc_key(&self, key: i64) -> i64 {
        key.div_euclid(self.group_size)
    }

    /// Ascending `(alloc_key, bucket, emit_index)` triples
    pub fn sorted(&self) -> impl Iterator<Item = SortedBucket<'_>> + Send + '_ {
        self.frozen.store(true, Ordering::SeqCst);
        self.buckets
            .iter()
            .enumerate()
            .map(|(index, (&key, bucket))| SortedBucket::shared(key, index, bucket.as_ref()))
    }

    /// Consume the router, yielding its buckets in ascending key order
    pub fn into_sorted(self) -> Vec<(i64, Box<dyn Bucket>)> {
        self.buckets.into_iter().collect()
    }
}

impl AllocRouter for Router {
    fn add(&mut self, record: Record) -> Result<()> {
        let alloc = self.alloc_key(record.key);
        if self.frozen.load(Ordering::SeqCst) {
            return Err(SortError::WriteAfterRead { key: alloc });
        }

        let bucket = self
            .buckets
            .entry(alloc)
            .or_insert_with(|| (self.factory)(alloc));
        bucket.add(record)?;
        self.total += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for bucket in self.buckets.values_mut() {
            bucket.flush()?;
        }
        Ok(())
    }

    fn iter(&self) -> SortedIter<'_> {
        Box::new(self.sorted().map(Ok))
    }

    fn num_blocks(&self) -> usize {
        self.buckets.len()
    }

    fn total_len(&self) -> usize {
        self.total
    }

    fn locations(&self) -> Result<Vec<ShardLocs>> {
        match &self.store {
            Some(store) => store.locations(),
            None => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        let dropped = self.buckets.len();
        self.buckets.clear();
        self.frozen.store(true, Ordering::SeqCst);

        if let Some(store) = self.store.take() {
            if let Err(e) = store.finish() {
                warn!(error = %e, "Failed to clean up block store");
                return Err(e);
            }
            debug!(buckets = dropped, "Router finished, block store removed");
        }
        Ok(())
    }
}
