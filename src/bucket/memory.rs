//! In-memory bucket

use std::borrow::Cow;

use crate::error::Result;
use crate::record::Record;

use super::Bucket;

/// Bucket backed by a growable `Vec`; memory use is the caller's concern
#[derive(Debug, Default, Clone)]
pub struct MemBucket {
    records: Vec<Record>,
}

impl MemBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bucket for MemBucket {
    fn add(&mut self, record: Record) -> Result<()> {
        self.records.push(record);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn all(&self) -> Result<Cow<'_, [Record]>> {
        Ok(Cow::Borrowed(&self.records))
    }
}
