//! Keyed records
//!
//! The unit the engine moves around: an allocation key and an opaque payload.

/// A single keyed record.
///
/// `key` is the allocation key chosen by the caller, not an application id.
/// `data` is never inspected by the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    pub key: i64,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(key: i64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            data: data.into(),
        }
    }
}
