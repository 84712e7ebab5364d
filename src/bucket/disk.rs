//! Disk-backed bucket
//!
//! Buffers records until their approximate encoded size passes the target
//! block size, then spills the buffer as one packed group. Reading merges
//! every spilled group with whatever is still buffered.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{error, trace};

use crate::error::{Result, SortError};
use crate::record::Record;
use crate::storage::BlockStore;
use crate::wire;

use super::Bucket;

/// Per-record size estimate added to the payload length (key, tags, lengths)
pub const RECORD_OVERHEAD: usize = 20;

/// Bucket that spills to a shared [`BlockStore`]
pub struct DiskBucket {
    /// Key the store files this bucket's groups under
    key: i64,

    store: Arc<dyn BlockStore>,

    /// Flush once `pending_size` exceeds this many bytes
    target_size: usize,

    /// Records not yet handed to the store
    pending: Vec<Record>,

    /// Approximate encoded size of `pending`
    pending_size: usize,

    /// Running count, including spilled records
    count: usize,
}

impl DiskBucket {
    pub fn new(key: i64, store: Arc<dyn BlockStore>, target_size: usize) -> Self {
        Self {
            key,
            store,
            target_size,
            pending: Vec::new(),
            pending_size: 0,
            count: 0,
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Records still buffered in memory
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Bucket for DiskBucket {
    fn add(&mut self, record: Record) -> Result<()> {
        self.pending_size += record.data.len() + RECORD_OVERHEAD;
        self.pending.push(record);
        self.count += 1;

        if self.pending_size > self.target_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let group = wire::pack_group(self.key, &self.pending);
        trace!(
            key = self.key,
            records = self.pending.len(),
            bytes = group.len(),
            "Spilling bucket"
        );
        self.store.write_block(self.key, group)?;

        self.pending.clear();
        self.pending_size = 0;
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }

    fn all(&self) -> Result<Cow<'_, [Record]>> {
        let mut records = Vec::with_capacity(self.count);
        records.extend_from_slice(&self.pending);

        for group in self.store.get_blocks(self.key)? {
            let (found, mut spilled) = wire::unpack_group(&group)?;
            if found != self.key {
                error!(expected = self.key, found, "Spilled group filed under wrong key");
                return Err(SortError::KeyMismatch {
                    expected: self.key,
                    found,
                });
            }
            records.append(&mut spilled);
        }

        Ok(Cow::Owned(records))
    }
}
