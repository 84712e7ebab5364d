//! Split Writer
//!
//! Shards a block store over many spill files so that no single file's
//! offset index grows with the whole key space. Bucket key `k` lands in
//! shard `k div split_factor`; shard files are created on first write.
//!
//! Every shard shares one write pipeline, so the thread count does not grow
//! with the number of shards. The first read ends the write phase of all of
//! them.

use std::path::Path;

use crate::config::BlockCompression;
use crate::error::{Result, SortError};

use super::locs::ShardLocs;
use super::spill::SpillSet;
use super::BlockStore;

/// Block store that routes each key to a per-shard spill file
pub struct SplitWriter {
    split_factor: i64,
    spill: SpillSet,
}

impl SplitWriter {
    pub fn new(temp_dir: &Path, split_factor: i64, compression: BlockCompression) -> Result<Self> {
        if split_factor < 1 {
            return Err(SortError::Config(format!(
                "split factor must be at least 1, got {}",
                split_factor
            )));
        }

        Ok(Self {
            split_factor,
            spill: SpillSet::new(temp_dir, compression)?,
        })
    }

    pub fn split_factor(&self) -> i64 {
        self.split_factor
    }

    /// Shard that holds `key`
    pub fn shard_of(&self, key: i64) -> i64 {
        key.div_euclid(self.split_factor)
    }

    /// Number of shards created so far
    pub fn shard_count(&self) -> usize {
        self.spill.shard_count()
    }

    /// True until the first read (or finish)
    pub fn is_writing(&self) -> bool {
        self.spill.is_writing()
    }
}

impl BlockStore for SplitWriter {
    fn write_block(&self, key: i64, group: Vec<u8>) -> Result<()> {
        self.spill.write_block(self.shard_of(key), key, group)
    }

    fn get_blocks(&self, key: i64) -> Result<Vec<Vec<u8>>> {
        self.spill.get_blocks(self.shard_of(key), key)
    }

    fn fragment_count(&self, key: i64) -> Result<usize> {
        self.spill.fragment_count(self.shard_of(key), key)
    }

    fn locations(&self) -> Result<Vec<ShardLocs>> {
        self.spill.locations()
    }

    fn finish(&self) -> Result<()> {
        self.spill.finish()
    }
}
