//! Disk Writer
//!
//! Spills keyed groups into a single temp file and reads them back by key.
//! A one-shard view over [`SpillSet`](super::spill::SpillSet).

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::BlockCompression;
use crate::error::Result;

use super::locs::ShardLocs;
use super::spill::SpillSet;
use super::BlockStore;

/// Shard number of the single file
const SHARD: i64 = 0;

/// Write-once, read-once block store backed by one temp file
pub struct DiskWriter {
    /// Location of the temp file
    path: PathBuf,

    spill: SpillSet,
}

impl DiskWriter {
    /// Create a writer with a fresh temp file in `temp_dir`
    pub fn create(temp_dir: &Path, compression: BlockCompression) -> Result<Self> {
        let spill = SpillSet::new(temp_dir, compression)?;
        let path = spill.open_shard(SHARD)?;

        debug!(path = ?path, "Created disk writer");

        Ok(Self { path, spill })
    }

    /// Path of the backing temp file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shard(&self) -> i64 {
        SHARD
    }

    /// True until the first read (or finish)
    pub fn is_writing(&self) -> bool {
        self.spill.is_writing()
    }
}

impl BlockStore for DiskWriter {
    fn write_block(&self, key: i64, group: Vec<u8>) -> Result<()> {
        self.spill.write_block(SHARD, key, group)
    }

    fn get_blocks(&self, key: i64) -> Result<Vec<Vec<u8>>> {
        self.spill.get_blocks(SHARD, key)
    }

    fn fragment_count(&self, key: i64) -> Result<usize> {
        self.spill.fragment_count(SHARD, key)
    }

    fn locations(&self) -> Result<Vec<ShardLocs>> {
        self.spill.locations()
    }

    fn finish(&self) -> Result<()> {
        self.spill.finish()
    }
}
