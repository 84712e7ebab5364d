//! Spill Set
//!
//! A group of spill files, one per shard, written through a single shared
//! pipeline. The number of background threads is fixed no matter how many
//! shards are opened.
//!
//! ## Pipeline
//! ```text
//!  write_block ──► jobs ──┬─► compress 0 ─┐
//!      │                  ├─► compress 1 ─┤
//!      │                  ├─► compress 2 ─┼─► framed ──► append writer ──► shard files
//!      │                  └─► compress 3 ─┘     ▲              │
//!      └── open shard ──────────────────────────┘              ▼
//!                                              index: shard → key → [offset]
//! ```
//!
//! A shard is announced on the framed channel before its first job enters
//! the pipeline, so the append writer always knows a shard's file before
//! any of its blocks arrive. The append writer keeps at most
//! `MAX_OPEN_FILES` handles open and reopens evicted files in append mode.
//!
//! ## Phases
//! - `Writing`: blocks are accepted; the index lives in the append thread
//! - `Readable`: the first read closes the job channel, waits for every
//!   worker to drain, and takes ownership of the index. Writes now fail.
//! - `Finished`: the files are gone; every call fails except `finish`

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tempfile::TempPath;
use tracing::{debug, trace};

use crate::config::BlockCompression;
use crate::error::{Result, SortError};

use super::block::{self, BLOCK_TYPE};
use super::locs::ShardLocs;

/// Parallel serialize/compress workers per spill set
pub const COMPRESS_WORKERS: usize = 4;

/// Parallel readers used by `get_blocks`
pub const READ_FANOUT: usize = 4;

/// Append handles the writer keeps open at once
pub const MAX_OPEN_FILES: usize = 64;

/// Depth of the job and framed-block channels
const QUEUE_DEPTH: usize = 16;

type BlockIndex = BTreeMap<i64, Vec<u64>>;
type ShardIndex = BTreeMap<i64, BlockIndex>;

struct Job {
    shard: i64,
    key: i64,
    group: Vec<u8>,
}

enum Framed {
    Open { shard: i64, path: PathBuf },
    Block { shard: i64, key: i64, block: Vec<u8> },
}

enum Phase {
    Writing(WritePipeline),
    Readable(Arc<ShardIndex>),
    Finished,
}

// =============================================================================
// Write Pipeline
// =============================================================================

/// Background threads of a spill set in its `Writing` phase
struct WritePipeline {
    jobs: Sender<Job>,
    framed: Sender<Framed>,
    compressors: Vec<JoinHandle<Result<()>>>,
    appender: JoinHandle<Result<ShardIndex>>,
}

impl WritePipeline {
    fn spawn(compression: BlockCompression) -> Result<Self> {
        let (jobs_tx, jobs_rx) = channel::bounded::<Job>(QUEUE_DEPTH);
        let (framed_tx, framed_rx) = channel::bounded::<Framed>(QUEUE_DEPTH);

        let mut compressors = Vec::with_capacity(COMPRESS_WORKERS);
        for worker in 0..COMPRESS_WORKERS {
            let jobs = jobs_rx.clone();
            let framed = framed_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("blocksort-compress-{}", worker))
                .spawn(move || compress_loop(jobs, framed, compression))?;
            compressors.push(handle);
        }

        let appender = thread::Builder::new()
            .name("blocksort-append".to_string())
            .spawn(move || append_loop(framed_rx))?;

        Ok(Self {
            jobs: jobs_tx,
            framed: framed_tx,
            compressors,
            appender,
        })
    }

    fn stopped() -> SortError {
        SortError::Pipeline("spill writer stopped accepting blocks".into())
    }

    fn open_shard(&self, shard: i64, path: PathBuf) -> Result<()> {
        self.framed
            .send(Framed::Open { shard, path })
            .map_err(|_| Self::stopped())
    }

    fn submit(&self, shard: i64, key: i64, group: Vec<u8>) -> Result<()> {
        self.jobs
            .send(Job { shard, key, group })
            .map_err(|_| Self::stopped())
    }

    /// Close the job channel and wait for every in-flight block to land
    fn drain(self) -> Result<ShardIndex> {
        let WritePipeline {
            jobs,
            framed,
            compressors,
            appender,
        } = self;
        drop(jobs);
        drop(framed);

        let mut worker_error = None;
        for handle in compressors {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(SortError::Pipeline("compress worker panicked".into())));
            if let Err(e) = outcome {
                worker_error.get_or_insert(e);
            }
        }

        let index = appender
            .join()
            .unwrap_or_else(|_| Err(SortError::Pipeline("append writer panicked".into())))?;

        match worker_error {
            Some(e) => Err(e),
            None => Ok(index),
        }
    }
}

fn compress_loop(jobs: Receiver<Job>, framed: Sender<Framed>, compression: BlockCompression) -> Result<()> {
    for Job { shard, key, group } in jobs.iter() {
        let block = block::frame_block(BLOCK_TYPE, &group, compression)?;
        framed
            .send(Framed::Block { shard, key, block })
            .map_err(|_| SortError::Pipeline("append writer stopped".into()))?;
    }
    Ok(())
}

/// Append state of one shard file
struct ShardSink {
    path: PathBuf,
    position: u64,
    index: BlockIndex,
}

fn append_loop(framed: Receiver<Framed>) -> Result<ShardIndex> {
    let mut sinks: BTreeMap<i64, ShardSink> = BTreeMap::new();
    let mut open: BTreeMap<i64, BufWriter<File>> = BTreeMap::new();

    for message in framed.iter() {
        let (shard, key, block) = match message {
            Framed::Open { shard, path } => {
                sinks.insert(
                    shard,
                    ShardSink {
                        path,
                        position: 0,
                        index: BlockIndex::new(),
                    },
                );
                continue;
            }
            Framed::Block { shard, key, block } => (shard, key, block),
        };

        let sink = sinks
            .get_mut(&shard)
            .ok_or_else(|| SortError::Pipeline(format!("block for unopened shard {}", shard)))?;

        if !open.contains_key(&shard) && open.len() >= MAX_OPEN_FILES {
            if let Some((_, mut evicted)) = open.pop_first() {
                evicted.flush()?;
            }
        }
        let writer = match open.entry(shard) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new().append(true).open(&sink.path)?;
                entry.insert(BufWriter::new(file))
            }
        };

        writer.write_all(&block)?;
        sink.index.entry(key).or_default().push(sink.position);
        trace!(shard, key, offset = sink.position, len = block.len(), "Appended block");
        sink.position += block.len() as u64;
    }

    for writer in open.values_mut() {
        writer.flush()?;
    }

    Ok(sinks
        .into_iter()
        .map(|(shard, sink)| (shard, sink.index))
        .collect())
}

// =============================================================================
// Reads
// =============================================================================

fn corruption(path: &Path, offset: u64, reason: impl Into<String>) -> SortError {
    SortError::Corruption {
        path: path.to_path_buf(),
        offset,
        reason: reason.into(),
    }
}

/// Read the blocks at `offsets` sequentially through one file handle
fn read_chunk(path: &Path, offsets: &[u64]) -> Result<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut blocks = Vec::with_capacity(offsets.len());

    for &offset in offsets {
        reader.seek(SeekFrom::Start(offset))?;
        let block = block::read_block(&mut reader).map_err(|e| corruption(path, offset, e.to_string()))?;
        if block.block_type != BLOCK_TYPE {
            return Err(corruption(
                path,
                offset,
                format!("unexpected block type {:?}", block.block_type),
            ));
        }
        blocks.push(block.data);
    }

    Ok(blocks)
}

/// Read the blocks at `offsets` with up to `READ_FANOUT` threads
fn read_offsets(path: &Path, offsets: &[u64]) -> Result<Vec<Vec<u8>>> {
    if offsets.len() <= 1 {
        return read_chunk(path, offsets);
    }

    let chunk_size = offsets.len().div_ceil(READ_FANOUT);
    crossbeam::thread::scope(|scope| -> Result<Vec<Vec<u8>>> {
        let handles: Vec<_> = offsets
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move |_| read_chunk(path, chunk)))
            .collect();

        let mut blocks = Vec::with_capacity(offsets.len());
        for handle in handles {
            let chunk = handle
                .join()
                .unwrap_or_else(|_| Err(SortError::Pipeline("block reader panicked".into())))?;
            blocks.extend(chunk);
        }
        Ok(blocks)
    })
    .map_err(|_| SortError::Pipeline("block reader panicked".into()))?
}

// =============================================================================
// SpillSet
// =============================================================================

/// Sharded spill files behind one write pipeline
pub(crate) struct SpillSet {
    temp_dir: PathBuf,

    /// Spill files by shard; removing a `TempPath` deletes its file.
    /// `None` once finished.
    files: Mutex<Option<BTreeMap<i64, TempPath>>>,

    phase: Mutex<Phase>,
}

impl SpillSet {
    pub(crate) fn new(temp_dir: &Path, compression: BlockCompression) -> Result<Self> {
        fs::create_dir_all(temp_dir)?;

        Ok(Self {
            temp_dir: temp_dir.to_path_buf(),
            files: Mutex::new(Some(BTreeMap::new())),
            phase: Mutex::new(Phase::Writing(WritePipeline::spawn(compression)?)),
        })
    }

    /// True until the first read (or finish)
    pub(crate) fn is_writing(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Writing(_))
    }

    /// Number of shard files created so far
    pub(crate) fn shard_count(&self) -> usize {
        self.files.lock().as_ref().map_or(0, BTreeMap::len)
    }

    /// Path of a shard's file, if the shard exists
    pub(crate) fn shard_path(&self, shard: i64) -> Option<PathBuf> {
        self.files
            .lock()
            .as_ref()
            .and_then(|files| files.get(&shard))
            .map(|path| path.to_path_buf())
    }

    fn writing(phase: &Phase, key: i64) -> Result<&WritePipeline> {
        match phase {
            Phase::Writing(pipeline) => Ok(pipeline),
            Phase::Readable(_) => Err(SortError::WriteAfterRead { key }),
            Phase::Finished => Err(SortError::StoreClosed),
        }
    }

    /// Create the file for `shard` if it does not exist yet
    fn ensure_shard(&self, pipeline: &WritePipeline, shard: i64) -> Result<PathBuf> {
        let mut files = self.files.lock();
        let files = files.as_mut().ok_or(SortError::StoreClosed)?;

        if let Some(path) = files.get(&shard) {
            return Ok(path.to_path_buf());
        }

        let path = tempfile::Builder::new()
            .prefix("blocksort-")
            .suffix(".blocks")
            .tempfile_in(&self.temp_dir)?
            .into_temp_path();
        pipeline.open_shard(shard, path.to_path_buf())?;

        debug!(path = ?path, shard, total = files.len() + 1, "Created spill file");
        let created = path.to_path_buf();
        files.insert(shard, path);
        Ok(created)
    }

    /// Create the file for `shard` ahead of any write
    pub(crate) fn open_shard(&self, shard: i64) -> Result<PathBuf> {
        let phase = self.phase.lock();
        let pipeline = Self::writing(&phase, 0)?;
        self.ensure_shard(pipeline, shard)
    }

    pub(crate) fn write_block(&self, shard: i64, key: i64, group: Vec<u8>) -> Result<()> {
        let phase = self.phase.lock();
        let pipeline = Self::writing(&phase, key)?;
        self.ensure_shard(pipeline, shard)?;
        pipeline.submit(shard, key, group)
    }

    /// Move to the read phase if still writing, returning the offset index
    fn ensure_readable(&self) -> Result<Arc<ShardIndex>> {
        let mut phase = self.phase.lock();

        let pipeline = match std::mem::replace(&mut *phase, Phase::Finished) {
            Phase::Writing(pipeline) => pipeline,
            Phase::Readable(index) => {
                let shared = Arc::clone(&index);
                *phase = Phase::Readable(index);
                return Ok(shared);
            }
            Phase::Finished => return Err(SortError::StoreClosed),
        };

        // A failed drain leaves the set Finished
        let index = Arc::new(pipeline.drain()?);
        debug!(
            shards = index.len(),
            blocks = index
                .values()
                .flat_map(|keys| keys.values())
                .map(Vec::len)
                .sum::<usize>(),
            "Spill files drained, entering read phase"
        );

        *phase = Phase::Readable(Arc::clone(&index));
        Ok(index)
    }

    pub(crate) fn get_blocks(&self, shard: i64, key: i64) -> Result<Vec<Vec<u8>>> {
        let index = self.ensure_readable()?;
        let offsets = match index.get(&shard).and_then(|keys| keys.get(&key)) {
            Some(offsets) => offsets,
            None => return Ok(Vec::new()),
        };

        let path = self.shard_path(shard).ok_or(SortError::StoreClosed)?;
        read_offsets(&path, offsets)
    }

    pub(crate) fn fragment_count(&self, shard: i64, key: i64) -> Result<usize> {
        let index = self.ensure_readable()?;
        Ok(index
            .get(&shard)
            .and_then(|keys| keys.get(&key))
            .map_or(0, Vec::len))
    }

    /// Index snapshot of every shard file, ascending by shard
    pub(crate) fn locations(&self) -> Result<Vec<ShardLocs>> {
        let index = self.ensure_readable()?;
        let files = self.files.lock();
        let files = files.as_ref().ok_or(SortError::StoreClosed)?;

        Ok(files
            .iter()
            .map(|(&shard, path)| ShardLocs {
                shard,
                path: path.to_path_buf(),
                locs: index
                    .get(&shard)
                    .map(|keys| keys.iter().map(|(k, v)| (*k, v.clone())).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Drain if still writing, then delete every file. Idempotent.
    pub(crate) fn finish(&self) -> Result<()> {
        let drained = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Finished) {
                Phase::Writing(pipeline) => pipeline.drain().map(|_| ()),
                _ => Ok(()),
            }
        };

        let files = match self.files.lock().take() {
            Some(files) => files,
            None => return drained,
        };

        // Remove every file even if one fails; report the first failure
        let count = files.len();
        let mut removed = Ok(());
        for path in files.into_values() {
            if let Err(e) = path.close() {
                if removed.is_ok() {
                    removed = Err(SortError::from(e));
                }
            }
        }
        if count > 0 {
            debug!(files = count, "Removed spill files");
        }

        drained.and(removed)
    }
}
