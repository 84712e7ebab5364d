//! Engine Module
//!
//! Drives a sort end to end: parallel ingest into a router, then parallel
//! ordered replay of its buckets.
//!
//! ## Responsibilities
//! - Fan N input streams through caller decomposition into one router
//! - Keep a single writer on the router during ingest
//! - Distribute buckets round-robin by emit index to output workers
//! - Surface the first failure and always clean up the store
//!
//! ## Data Flow
//! ```text
//!  input 0 ─► producer ─┐                                 ┌─► worker 0 ─► output
//!  input 1 ─► producer ─┼─► bounded(0) ─► Router::add     ├─► worker 1 ─► output
//!  input 2 ─► producer ─┘     (calling thread)            └─► worker 2 ─► output
//!                                   │                           ▲
//!                                   ▼                           │
//!                               flush ──► iter ──► distributor ─┘
//!                                                (index % workers)
//! ```

use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, SortError};
use crate::record::Record;
use crate::router::{make_alloc_block_store, AllocRouter, SortedBucket, SortedIter};

/// Buckets queued per emit worker
pub const EMIT_QUEUE_DEPTH: usize = 5;

// =============================================================================
// Ingest
// =============================================================================

/// Handle through which a decomposition function emits records
pub struct RecordSink {
    tx: Sender<Record>,
}

impl RecordSink {
    /// Emit a record built from `key` and `data`
    pub fn push(&self, key: i64, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Record::new(key, data))
    }

    /// Emit a record. Fails once ingest has stopped.
    pub fn send(&self, record: Record) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|_| SortError::Pipeline("record consumer stopped".into()))
    }
}

/// Ingest every input into `router`.
///
/// One producer thread per input calls `decompose` on each received value.
/// Records rendezvous with the calling thread, which is the only one to
/// touch the router. The router is flushed once every producer is done.
pub fn add_data<T, F>(router: &mut dyn AllocRouter, inputs: Vec<Receiver<T>>, decompose: F) -> Result<()>
where
    T: Send,
    F: Fn(T, &RecordSink) -> Result<()> + Sync,
{
    let producers = inputs.len();
    let decompose = &decompose;
    let (tx, rx) = channel::bounded::<Record>(0);

    let outcome = crossbeam::thread::scope(|scope| -> Result<usize> {
        // Step 1: one producer per input
        let handles: Vec<_> = inputs
            .into_iter()
            .map(|input| {
                let sink = RecordSink { tx: tx.clone() };
                scope.spawn(move |_| -> Result<()> {
                    for value in input.iter() {
                        decompose(value, &sink)?;
                    }
                    Ok(())
                })
            })
            .collect();
        drop(tx);

        // Step 2: single consumer; an error closes the channel so that
        // producers fail on their next send
        let mut added = 0usize;
        let mut consumed = Ok(());
        for record in rx.iter() {
            if let Err(e) = router.add(record) {
                consumed = Err(e);
                break;
            }
            added += 1;
        }
        drop(rx);

        // Step 3: join producers; a consumer failure outranks the send
        // failures it causes
        let mut produced = Ok(());
        for handle in handles {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(SortError::Pipeline("producer panicked".into())));
            if produced.is_ok() {
                produced = result;
            }
        }

        consumed.and(produced).map(|_| added)
    })
    .map_err(|_| SortError::Pipeline("ingest scope panicked".into()))
    .and_then(|outcome| outcome);

    let added = outcome.map_err(report)?;
    router.flush().map_err(report)?;

    debug!(
        producers,
        records = added,
        buckets = router.num_blocks(),
        "Ingest finished"
    );
    Ok(())
}

// =============================================================================
// Emit
// =============================================================================

/// Replay the router's buckets through `output` on `num_consumers` workers.
///
/// Bucket `i` in ascending key order goes to worker `i % num_consumers`, so
/// each worker sees its buckets in ascending order. Returns the number of
/// buckets emitted.
pub fn read_data<F>(router: &dyn AllocRouter, num_consumers: usize, output: F) -> Result<usize>
where
    F: Fn(usize, usize, i64, &[Record]) -> Result<()> + Sync,
{
    if num_consumers == 0 {
        return Err(SortError::Config("at least one consumer is required".into()));
    }

    let output = &output;
    let buckets = router.iter();

    let outcome = crossbeam::thread::scope(|scope| -> Result<usize> {
        let mut senders = Vec::with_capacity(num_consumers);
        let mut workers = Vec::with_capacity(num_consumers);
        for worker in 0..num_consumers {
            let (tx, rx) = channel::bounded::<SortedBucket<'_>>(EMIT_QUEUE_DEPTH);
            senders.push(tx);
            workers.push(scope.spawn(move |_| emit_loop(worker, rx, output)));
        }

        let distributor = scope.spawn(move |_| distribute(buckets, senders));

        let mut emitted = 0usize;
        let mut worker_error = None;
        for handle in workers {
            match handle.join() {
                Ok(Ok(count)) => emitted += count,
                Ok(Err(e)) => {
                    worker_error.get_or_insert(e);
                }
                Err(_) => {
                    worker_error.get_or_insert(SortError::Pipeline("emit worker panicked".into()));
                }
            }
        }

        let distributed = distributor
            .join()
            .unwrap_or_else(|_| Err(SortError::Pipeline("distributor panicked".into())));

        match worker_error {
            Some(e) => Err(e),
            None => distributed.map(|_| emitted),
        }
    })
    .map_err(|_| SortError::Pipeline("emit scope panicked".into()))
    .and_then(|outcome| outcome);

    let emitted = outcome.map_err(report)?;
    debug!(workers = num_consumers, buckets = emitted, "Emit finished");
    Ok(emitted)
}

fn distribute<'a>(buckets: SortedIter<'a>, senders: Vec<Sender<SortedBucket<'a>>>) -> Result<usize> {
    let mut sent = 0usize;
    for bucket in buckets {
        let bucket = bucket?;
        let worker = bucket.index % senders.len();
        if senders[worker].send(bucket).is_err() {
            debug!(worker, "Emit worker stopped, halting distribution");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

fn emit_loop<F>(worker: usize, buckets: Receiver<SortedBucket<'_>>, output: &F) -> Result<usize>
where
    F: Fn(usize, usize, i64, &[Record]) -> Result<()>,
{
    let mut emitted = 0usize;
    for bucket in buckets.iter() {
        let records = bucket.records()?;
        output(worker, bucket.index, bucket.key, &records)?;
        emitted += 1;
    }
    Ok(emitted)
}

/// Log integrity violations before they propagate
fn report(e: SortError) -> SortError {
    if e.is_integrity() {
        error!(error = %e, "Integrity violation, aborting sort");
    }
    e
}

// =============================================================================
// Sort
// =============================================================================

/// Outcome of [`sort_by_tile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSummary {
    /// Buckets held by the router after ingest
    pub num_blocks: usize,
    /// Records ingested
    pub total_records: usize,
    /// Buckets passed to `output`
    pub emitted: usize,
}

/// Build the store for `config`, ingest `inputs`, emit in key order.
///
/// The router is finished whether or not the sort succeeds.
pub fn sort_by_tile<T, D, O>(
    config: &Config,
    inputs: Vec<Receiver<T>>,
    decompose: D,
    output: O,
) -> Result<SortSummary>
where
    T: Send,
    D: Fn(T, &RecordSink) -> Result<()> + Sync,
    O: Fn(usize, usize, i64, &[Record]) -> Result<()> + Sync,
{
    let mut router = make_alloc_block_store(config)?;

    let sorted = run_sort(router.as_mut(), config, inputs, decompose, output);
    let finished = router.finish();

    match (sorted, finished) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            warn!(error = %cleanup, "Cleanup failed after sort error");
            Err(e)
        }
    }
}

fn run_sort<T, D, O>(
    router: &mut dyn AllocRouter,
    config: &Config,
    inputs: Vec<Receiver<T>>,
    decompose: D,
    output: O,
) -> Result<SortSummary>
where
    T: Send,
    D: Fn(T, &RecordSink) -> Result<()> + Sync,
    O: Fn(usize, usize, i64, &[Record]) -> Result<()> + Sync,
{
    let start = Instant::now();
    add_data(router, inputs, decompose)?;
    let ingest_elapsed = start.elapsed();
    info!(
        mode = %config.store_mode,
        records = router.total_len(),
        buckets = router.num_blocks(),
        elapsed_ms = ingest_elapsed.as_millis() as u64,
        "Ingest phase complete"
    );

    let emit_start = Instant::now();
    let emitted = read_data(router, config.num_consumers, output)?;
    info!(
        mode = %config.store_mode,
        emitted,
        workers = config.num_consumers,
        elapsed_ms = emit_start.elapsed().as_millis() as u64,
        "Emit phase complete"
    );

    Ok(SortSummary {
        num_blocks: router.num_blocks(),
        total_records: router.total_len(),
        emitted,
    })
}
