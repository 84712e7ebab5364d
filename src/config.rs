//! Configuration for blocksort
//!
//! Centralized configuration with sensible defaults, plus the preset store
//! layouts selected by [`StoreMode`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SortError;

/// Main configuration for a sort run
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Which preset store shape to build
    pub store_mode: StoreMode,

    /// Directory for spill files. Each disk writer creates one uniquely
    /// named file here and removes it on finish.
    pub temp_dir: PathBuf,

    /// Compression applied to spilled blocks
    pub compression: BlockCompression,

    // -------------------------------------------------------------------------
    // Emit Configuration
    // -------------------------------------------------------------------------
    /// Number of parallel output workers used by `sort_by_tile`
    pub num_consumers: usize,
}

/// How spilled blocks are compressed on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCompression {
    /// Store the group bytes as-is
    None,

    /// zlib with the given level (0-9)
    Zlib { level: u32 },
}

impl Default for BlockCompression {
    fn default() -> Self {
        BlockCompression::Zlib { level: 6 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_mode: StoreMode::Block,
            temp_dir: std::env::temp_dir(),
            compression: BlockCompression::default(),
            num_consumers: 4,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the store mode
    pub fn store_mode(mut self, mode: StoreMode) -> Self {
        self.config.store_mode = mode;
        self
    }

    /// Set the directory used for spill files
    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = path.into();
        self
    }

    /// Set the block compression
    pub fn compression(mut self, compression: BlockCompression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set the number of output workers
    pub fn num_consumers(mut self, count: usize) -> Self {
        self.config.num_consumers = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Store Modes
// =============================================================================

/// Preset store shapes, selected by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Everything held in memory
    Block,

    /// One spill file, one bucket per key
    TempFile,

    /// Sharded spill files, coarse buckets regrouped on read
    TempFileSplit,

    /// Sharded spill files, one bucket per key
    TempFileSlim,
}

/// Where buckets keep their records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    TempFile,
    Split { split_factor: i64 },
}

/// Fully resolved parameters of a store mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    pub storage: StorageKind,

    /// Buffered bytes per bucket before it spills a block
    pub target_block_size: usize,

    /// Number of consecutive allocation keys sharing one bucket
    pub group_size: i64,

    /// Restore per-key order inside each coarse bucket when reading
    pub regroup: bool,
}

impl StoreMode {
    /// All recognised modes, in documentation order
    pub const ALL: [StoreMode; 4] = [
        StoreMode::Block,
        StoreMode::TempFile,
        StoreMode::TempFileSplit,
        StoreMode::TempFileSlim,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StoreMode::Block => "block",
            StoreMode::TempFile => "tempfile",
            StoreMode::TempFileSplit => "tempfilesplit",
            StoreMode::TempFileSlim => "tempfileslim",
        }
    }

    pub fn layout(&self) -> StoreLayout {
        match self {
            StoreMode::Block => StoreLayout {
                storage: StorageKind::Memory,
                target_block_size: 0,
                group_size: 1,
                regroup: false,
            },
            StoreMode::TempFile => StoreLayout {
                storage: StorageKind::TempFile,
                target_block_size: 64 * 1024,
                group_size: 1,
                regroup: false,
            },
            StoreMode::TempFileSplit => StoreLayout {
                storage: StorageKind::Split { split_factor: 100 },
                target_block_size: 2 * 1024 * 1024,
                group_size: 500,
                regroup: true,
            },
            StoreMode::TempFileSlim => StoreLayout {
                storage: StorageKind::Split { split_factor: 500 },
                target_block_size: 64 * 1024,
                group_size: 1,
                regroup: true,
            },
        }
    }
}

impl FromStr for StoreMode {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreMode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| SortError::UnknownStoreMode(s.to_string()))
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
