//! blocksort Binary
//!
//! Runs a synthetic sort through a chosen store mode and checks the output.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use blocksort::storage::write_locs;
use blocksort::{
    add_data, make_alloc_block_store, read_data, sort_by_tile, BlockCompression, Config, Record,
    RecordSink, SortError, StoreMode,
};
use clap::Parser;
use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

/// Records generated per input block
const BLOCK_RECORDS: usize = 1024;

/// blocksort synthetic run
#[derive(Parser, Debug)]
#[command(name = "blocksort")]
#[command(about = "External block-sort and grouping engine")]
#[command(version)]
struct Args {
    /// Store mode: block, tempfile, tempfilesplit or tempfileslim
    #[arg(short, long, default_value = "tempfile")]
    mode: StoreMode,

    /// Number of records to generate
    #[arg(short, long, default_value = "1000000")]
    records: usize,

    /// Number of distinct allocation keys
    #[arg(short, long, default_value = "10000")]
    keys: u64,

    /// Payload size of each record in bytes
    #[arg(long, default_value = "64")]
    payload_bytes: usize,

    /// Producer threads
    #[arg(short, long, default_value = "4")]
    producers: usize,

    /// Emit worker threads
    #[arg(short, long, default_value = "4")]
    consumers: usize,

    /// Directory for spill files (defaults to the system temp dir)
    #[arg(short, long)]
    temp_dir: Option<PathBuf>,

    /// Write the offset index snapshot of the spill files to FILE
    #[arg(long, value_name = "FILE")]
    dump_locs: Option<PathBuf>,

    /// Store spilled blocks uncompressed
    #[arg(long)]
    no_compress: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blocksort=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("blocksort v{}", blocksort::VERSION);
    tracing::info!(
        "Mode: {}, records: {}, keys: {}",
        args.mode,
        args.records,
        args.keys
    );

    if args.keys == 0 || args.producers == 0 {
        tracing::error!("--keys and --producers must be at least 1");
        std::process::exit(2);
    }

    // Build config from args
    let mut builder = Config::builder()
        .store_mode(args.mode)
        .num_consumers(args.consumers);
    if let Some(dir) = &args.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if args.no_compress {
        builder = builder.compression(BlockCompression::None);
    }
    let config = builder.build();

    let start = Instant::now();
    let verifier = Verifier::new(args.consumers);
    let inputs = spawn_feeders(&args);
    let payload_bytes = args.payload_bytes;
    let decompose = move |seeds: Vec<u64>, sink: &RecordSink| -> blocksort::Result<()> {
        for seed in seeds {
            sink.send(synthetic_record(seed, args.keys, payload_bytes))?;
        }
        Ok(())
    };
    let output = |worker: usize, index: usize, key: i64, records: &[Record]| {
        verifier.check(worker, index, key, records)
    };

    let result = match &args.dump_locs {
        Some(path) => run_with_snapshot(&config, path, inputs, decompose, output),
        None => sort_by_tile(&config, inputs, decompose, output).map(|s| s.emitted),
    };

    let emitted = match result {
        Ok(emitted) => emitted,
        Err(e) => {
            tracing::error!("Sort failed: {}", e);
            std::process::exit(1);
        }
    };

    let seen = verifier.records.load(Ordering::SeqCst);
    if seen != args.records {
        tracing::error!("Record count mismatch: generated {}, emitted {}", args.records, seen);
        std::process::exit(1);
    }

    tracing::info!(
        "Sorted {} records into {} buckets in {:.2?}",
        seen,
        emitted,
        start.elapsed()
    );
}

/// Same as `sort_by_tile`, with the offset index written out between ingest
/// and emit
fn run_with_snapshot<D, O>(
    config: &Config,
    path: &Path,
    inputs: Vec<Receiver<Vec<u64>>>,
    decompose: D,
    output: O,
) -> blocksort::Result<usize>
where
    D: Fn(Vec<u64>, &RecordSink) -> blocksort::Result<()> + Sync,
    O: Fn(usize, usize, i64, &[Record]) -> blocksort::Result<()> + Sync,
{
    let mut router = make_alloc_block_store(config)?;

    let result = (|| -> blocksort::Result<usize> {
        add_data(router.as_mut(), inputs, decompose)?;

        let shards = router.locations()?;
        write_locs(path, &shards)?;
        tracing::info!(
            "Wrote offset index for {} spill files ({} blocks) to {:?}",
            shards.len(),
            shards.iter().map(|s| s.block_count()).sum::<usize>(),
            path
        );

        read_data(router.as_ref(), config.num_consumers, output)
    })();

    let finished = router.finish();
    let emitted = result?;
    finished?;
    Ok(emitted)
}

/// One feeder thread per producer, each sending blocks of record seeds
fn spawn_feeders(args: &Args) -> Vec<Receiver<Vec<u64>>> {
    let mut inputs = Vec::with_capacity(args.producers);
    let mut first = 0u64;

    for producer in 0..args.producers {
        let (tx, rx) = channel::bounded(4);
        let share = (args.records / args.producers
            + usize::from(producer < args.records % args.producers)) as u64;
        let seeds = first..first + share;
        first += share;

        thread::spawn(move || {
            let seeds: Vec<u64> = seeds.collect();
            for block in seeds.chunks(BLOCK_RECORDS) {
                if tx.send(block.to_vec()).is_err() {
                    break;
                }
            }
        });
        inputs.push(rx);
    }

    inputs
}

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn synthetic_record(seed: u64, keys: u64, payload_bytes: usize) -> Record {
    let hash = splitmix64(seed);
    let key = (hash % keys) as i64;
    let data: Vec<u8> = hash
        .to_le_bytes()
        .iter()
        .copied()
        .cycle()
        .take(payload_bytes)
        .collect();
    Record::new(key, data)
}

/// Checks that every worker sees strictly ascending keys and indexes
struct Verifier {
    last: Vec<Mutex<Option<(usize, i64)>>>,
    records: AtomicUsize,
}

impl Verifier {
    fn new(workers: usize) -> Self {
        Self {
            last: (0..workers).map(|_| Mutex::new(None)).collect(),
            records: AtomicUsize::new(0),
        }
    }

    fn check(&self, worker: usize, index: usize, key: i64, records: &[Record]) -> blocksort::Result<()> {
        let slot = self
            .last
            .get(worker)
            .ok_or_else(|| SortError::Output(format!("unknown worker {}", worker)))?;
        let mut last = slot.lock();

        if let Some((prev_index, prev_key)) = *last {
            if index <= prev_index || key <= prev_key {
                return Err(SortError::Output(format!(
                    "worker {} went from ({}, {}) to ({}, {})",
                    worker, prev_index, prev_key, index, key
                )));
            }
        }
        if let Some(stray) = records.iter().find(|r| r.key != key) {
            return Err(SortError::Output(format!(
                "record with key {} emitted under key {}",
                stray.key, key
            )));
        }

        *last = Some((index, key));
        self.records.fetch_add(records.len(), Ordering::SeqCst);
        Ok(())
    }
}
