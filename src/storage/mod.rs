//! Storage Module
//!
//! Temporary on-disk block stores used when buckets spill out of memory.
//!
//! ## Responsibilities
//! - Accept keyed record groups while ingest is running
//! - Serialize, compress and append them off the caller's thread
//! - Keep an in-memory `key → [offset]` index per backing file
//! - Serve every fragment of a key once ingest is over
//! - Delete the backing files on finish
//!
//! ## File Format
//! A spill file is a plain concatenation of framed blocks (see [`block`]).
//! Nothing but the in-memory index points into it; the file does not outlive
//! the process run.
//!
//! ```text
//! ┌───────────────┬───────────────┬───────────────┬─────┐
//! │ Block (key a) │ Block (key b) │ Block (key a) │ ... │
//! └───────────────┴───────────────┴───────────────┴─────┘
//! ```

pub mod block;
pub mod locs;

mod disk_writer;
mod spill;
mod split_writer;

pub use disk_writer::DiskWriter;
pub use locs::{read_locs, write_locs, FileLocs, ShardLocs};
pub use spill::{COMPRESS_WORKERS, MAX_OPEN_FILES, READ_FANOUT};
pub use split_writer::SplitWriter;

use crate::error::Result;

/// A write-once, read-once store of keyed record groups.
///
/// Writes may arrive from the single ingest thread; reads may arrive from
/// many emit workers at once. The first read ends the write phase of every
/// backing file for good.
pub trait BlockStore: Send + Sync {
    /// Queue a packed group for `key`
    fn write_block(&self, key: i64, group: Vec<u8>) -> Result<()>;

    /// Every group written for `key`, decompressed, in no particular order
    fn get_blocks(&self, key: i64) -> Result<Vec<Vec<u8>>>;

    /// Number of groups written for `key`
    fn fragment_count(&self, key: i64) -> Result<usize>;

    /// Snapshot of the offset index of every backing file
    fn locations(&self) -> Result<Vec<ShardLocs>>;

    /// Wait for pending writes, then delete the backing files. Idempotent.
    fn finish(&self) -> Result<()>;
}
