//! Bucket Module
//!
//! Leaf containers holding the records of one allocation key (or one coarse
//! group of keys).
//!
//! ## Responsibilities
//! - Accept records one at a time from the owning router
//! - Keep a running count
//! - Hand back every record ever added, each exactly once
//!
//! ## Variants
//! - [`MemBucket`]: a plain `Vec`, read back without copying
//! - [`DiskBucket`]: buffers up to a target size, then spills the buffer as
//!   one packed group through a shared [`crate::storage::BlockStore`]

mod disk;
mod memory;

use std::borrow::Cow;

use crate::error::Result;
use crate::record::Record;

pub use disk::{DiskBucket, RECORD_OVERHEAD};
pub use memory::MemBucket;

/// Records for one allocation key.
///
/// Order inside `all()` is not significant, but every record added must be
/// returned exactly once.
pub trait Bucket: Send + Sync {
    /// Add one record
    fn add(&mut self, record: Record) -> Result<()>;

    /// Push any buffered records to the backing medium
    fn flush(&mut self) -> Result<()>;

    /// Number of records added so far
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record added so far
    fn all(&self) -> Result<Cow<'_, [Record]>>;
}
