//! # blocksort
//!
//! An external block-sort and grouping engine for quadtree-tiled map data:
//! - Groups opaque records by an integer allocation key
//! - Spills groups to compressed temp files when they outgrow memory
//! - Replays every group in ascending key order on parallel workers
//! - Removes its spill files when done
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Producers (decompose input blocks)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ bounded(0)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Allocation Router                          │
//! │        (single writer, key div group_size → bucket)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  MemBucket  │          │ DiskBucket  │
//!   │   (Vec)     │          │ (buffered)  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │ packed groups
//!                                   ▼
//!                        ┌─────────────────────┐
//!                        │ DiskWriter / Split  │
//!                        │ (zlib temp blocks)  │
//!                        └─────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use blocksort::{sort_by_tile, Config, StoreMode};
//! use crossbeam::channel;
//!
//! let (tx, rx) = channel::bounded::<Vec<i64>>(4);
//! std::thread::spawn(move || {
//!     let _ = tx.send(vec![3, 1, 2, 1]);
//! });
//!
//! let config = Config::builder().store_mode(StoreMode::TempFile).build();
//! let summary = sort_by_tile(
//!     &config,
//!     vec![rx],
//!     |keys, sink| {
//!         for key in keys {
//!             sink.push(key, key.to_le_bytes())?;
//!         }
//!         Ok(())
//!     },
//!     |_worker, _index, key, records| {
//!         println!("{} → {} records", key, records.len());
//!         Ok(())
//!     },
//! )?;
//! assert_eq!(summary.total_records, 4);
//! # Ok::<(), blocksort::SortError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod wire;
pub mod bucket;
pub mod storage;
pub mod router;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, SortError};
pub use config::{BlockCompression, Config, StoreMode};
pub use record::Record;
pub use router::{make_alloc_block_store, AllocRouter, RegroupRouter, Router};
pub use engine::{add_data, read_data, sort_by_tile, RecordSink, SortSummary};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blocksort
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
