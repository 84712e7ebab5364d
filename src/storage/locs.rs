//! Offset index snapshots
//!
//! A store's `key → [offset]` index can be exported and written next to the
//! spill files for inspection. The snapshot is a bincode-encoded list of
//! [`ShardLocs`], one per backing file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SortError};

/// Offsets of every block written for each key, ascending by key
pub type FileLocs = Vec<(i64, Vec<u64>)>;

/// Index of one backing file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLocs {
    /// Shard number (0 for unsharded stores)
    pub shard: i64,
    /// Path of the backing file at the time of the snapshot
    pub path: PathBuf,
    pub locs: FileLocs,
}

impl ShardLocs {
    /// Total number of blocks recorded for this file
    pub fn block_count(&self) -> usize {
        self.locs.iter().map(|(_, offsets)| offsets.len()).sum()
    }
}

/// Write a snapshot to `path`, replacing any existing file
pub fn write_locs(path: &Path, shards: &[ShardLocs]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, shards)
        .map_err(|e| SortError::Serialization(format!("Failed to write {:?}: {}", path, e)))?;
    writer.flush()?;
    Ok(())
}

/// Read a snapshot written by [`write_locs`]
pub fn read_locs(path: &Path) -> Result<Vec<ShardLocs>> {
    let reader = BufReader::new(File::open(path)?);
    bincode::deserialize_from(reader)
        .map_err(|e| SortError::Serialization(format!("Failed to read {:?}: {}", path, e)))
}
