//! Router Module
//!
//! Routes records to buckets by allocation key during ingest, then replays
//! the buckets in ascending key order during emit.
//!
//! ## Responsibilities
//! - Map each record key to an allocation key (`key div group_size`)
//! - Create buckets lazily, in memory or spilling to a block store
//! - Yield `(alloc_key, bucket, emit_index)` in ascending key order
//! - Regroup coarse buckets into fine per-key buckets when configured
//! - Finish the backing store when done
//!
//! ## Lifecycle
//! ```text
//!   add ... add ──► flush ──► iter (frozen) ──► finish
//!   (one thread)              (any number of      (idempotent)
//!                              emit workers)
//! ```

mod plain;
mod regroup;

use std::borrow::Cow;
use std::sync::Arc;

use tracing::debug;

use crate::bucket::{Bucket, MemBucket};
use crate::config::{Config, StorageKind};
use crate::error::Result;
use crate::record::Record;
use crate::storage::{BlockStore, DiskWriter, ShardLocs, SplitWriter};

pub use plain::{BucketFactory, Router};
pub use regroup::RegroupRouter;

/// Ascending stream of buckets produced by [`AllocRouter::iter`]
pub type SortedIter<'a> = Box<dyn Iterator<Item = Result<SortedBucket<'a>>> + Send + 'a>;

// =============================================================================
// SortedBucket
// =============================================================================

enum BucketHandle<'a> {
    /// Bucket still owned by the router
    Shared(&'a dyn Bucket),
    /// Bucket built during iteration (regrouping)
    Owned(Box<dyn Bucket>),
}

/// One bucket in emit order
pub struct SortedBucket<'a> {
    /// Allocation key of the bucket
    pub key: i64,
    /// Position in the ascending sequence, starting at 0
    pub index: usize,
    bucket: BucketHandle<'a>,
}

impl<'a> SortedBucket<'a> {
    pub(crate) fn shared(key: i64, index: usize, bucket: &'a dyn Bucket) -> Self {
        Self {
            key,
            index,
            bucket: BucketHandle::Shared(bucket),
        }
    }

    pub(crate) fn owned(key: i64, index: usize, bucket: Box<dyn Bucket>) -> Self {
        Self {
            key,
            index,
            bucket: BucketHandle::Owned(bucket),
        }
    }

    fn bucket(&self) -> &dyn Bucket {
        match &self.bucket {
            BucketHandle::Shared(bucket) => *bucket,
            BucketHandle::Owned(bucket) => bucket.as_ref(),
        }
    }

    /// Number of records in the bucket
    pub fn len(&self) -> usize {
        self.bucket().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record of the bucket; may read spilled fragments from disk
    pub fn records(&self) -> Result<Cow<'_, [Record]>> {
        self.bucket().all()
    }
}

// =============================================================================
// AllocRouter
// =============================================================================

/// Allocation router as seen by the ingest and emit stages
pub trait AllocRouter: Send {
    /// Route one record to its bucket. Fails once iteration has started.
    fn add(&mut self, record: Record) -> Result<()>;

    /// Flush every bucket's pending records
    fn flush(&mut self) -> Result<()>;

    /// Buckets in ascending key order with contiguous emit indexes.
    /// Freezes the router.
    fn iter(&self) -> SortedIter<'_>;

    /// Number of buckets held by the router
    fn num_blocks(&self) -> usize;

    /// Number of records added
    fn total_len(&self) -> usize;

    /// Offset index snapshot of the backing store; empty in memory
    fn locations(&self) -> Result<Vec<ShardLocs>>;

    /// Drop all buckets and delete the backing store. Idempotent.
    fn finish(&mut self) -> Result<()>;
}

/// Build the router for `config.store_mode`
pub fn make_alloc_block_store(config: &Config) -> Result<Box<dyn AllocRouter>> {
    let layout = config.store_mode.layout();

    let router = match layout.storage {
        StorageKind::Memory => Router::new(
            layout.group_size,
            Box::new(|_| Box::new(MemBucket::new())),
            None,
        )?,
        StorageKind::TempFile => {
            let store: Arc<dyn BlockStore> =
                Arc::new(DiskWriter::create(&config.temp_dir, config.compression)?);
            Router::with_store(store, layout.target_block_size, layout.group_size)?
        }
        StorageKind::Split { split_factor } => {
            let store: Arc<dyn BlockStore> = Arc::new(SplitWriter::new(
                &config.temp_dir,
                split_factor,
                config.compression,
            )?);
            Router::with_store(store, layout.target_block_size, layout.group_size)?
        }
    };

    debug!(
        mode = %config.store_mode,
        storage = ?layout.storage,
        target_block_size = layout.target_block_size,
        group_size = layout.group_size,
        regroup = layout.regroup,
        "Created allocation router"
    );

    if layout.regroup {
        Ok(Box::new(RegroupRouter::new(router)))
    } else {
        Ok(Box::new(router))
    }
}
