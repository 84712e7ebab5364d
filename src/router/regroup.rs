//! Regrouping router
//!
//! Ingest goes into coarse buckets (`key div group_size`) so that far fewer
//! buckets buffer records at once. On read, each coarse bucket is split
//! again into one in-memory bucket per fine key:
//!
//! ```text
//! coarse 0: [k=3, k=1, k=3, k=0] ──► (0, [..]) (1, [..]) (3, [..])
//! coarse 1: [k=7, k=5]           ──► (5, [..]) (7, [..])
//!                                     idx 0     1     2     3     4
//! ```

use std::vec;

use tracing::error;

use crate::bucket::Bucket;
use crate::error::{Result, SortError};
use crate::record::Record;
use crate::storage::ShardLocs;

use super::{AllocRouter, Router, SortedBucket, SortedIter};

/// Router that stores coarse groups and emits fine keys
pub struct RegroupRouter {
    inner: Router,
}

impl RegroupRouter {
    pub fn new(inner: Router) -> Self {
        Self { inner }
    }

    /// Number of fine keys per coarse bucket
    pub fn group_size(&self) -> i64 {
        self.inner.group_size()
    }
}

impl AllocRouter for RegroupRouter {
    fn add(&mut self, record: Record) -> Result<()> {
        self.inner.add(record)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn iter(&self) -> SortedIter<'_> {
        Box::new(RegroupIter {
            coarse: self.inner.iter(),
            group_size: self.inner.group_size(),
            pending: Vec::new().into_iter(),
            next_index: 0,
            done: false,
        })
    }

    /// Coarse bucket count; fine keys are only known once iterated
    fn num_blocks(&self) -> usize {
        self.inner.num_blocks()
    }

    fn total_len(&self) -> usize {
        self.inner.total_len()
    }

    fn locations(&self) -> Result<Vec<ShardLocs>> {
        self.inner.locations()
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }
}

struct RegroupIter<'a> {
    coarse: SortedIter<'a>,
    group_size: i64,

    /// Fine buckets of the current coarse bucket not yet emitted
    pending: vec::IntoIter<(i64, Box<dyn Bucket>)>,

    next_index: usize,
    done: bool,
}

impl RegroupIter<'_> {
    /// Split one coarse bucket into ascending fine buckets
    fn regroup(&self, coarse: &SortedBucket<'_>) -> Result<Vec<(i64, Box<dyn Bucket>)>> {
        let records = coarse.records()?;
        let mut fine = Router::in_memory();

        for record in records.into_owned() {
            let group = record.key.div_euclid(self.group_size);
            if group != coarse.key {
                error!(
                    coarse = coarse.key,
                    key = record.key,
                    group,
                    "Record read back from the wrong coarse bucket"
                );
                return Err(SortError::KeyMismatch {
                    expected: coarse.key,
                    found: group,
                });
            }
            fine.add(record)?;
        }

        fine.flush()?;
        Ok(fine.into_sorted())
    }
}

impl<'a> Iterator for RegroupIter<'a> {
    type Item = Result<SortedBucket<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if let Some((key, bucket)) = self.pending.next() {
                let index = self.next_index;
                self.next_index += 1;
                return Some(Ok(SortedBucket::owned(key, index, bucket)));
            }

            let coarse = match self.coarse.next() {
                Some(Ok(coarse)) => coarse,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            match self.regroup(&coarse) {
                Ok(fine) => self.pending = fine.into_iter(),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
