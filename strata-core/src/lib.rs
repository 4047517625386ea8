//! Strata Core - append-only LSM time-series storage engine
//!
//! Writes are appended to a sequential log, flattened into immutable
//! column-oriented segment files at level 0, and merged into larger levels
//! by compaction.
//!
//! # Architecture
//!
//! - **Codec**: fixed-width encodings for log rows and segment headers
//! - **Log**: buffered append-only ingestion log
//! - **Segment**: sorted, column-oriented immutable files
//! - **Manifest**: which level holds which segment
//! - **Compaction**: merging a level's segment into the next level
//! - **Storage**: the engine tying the above together

pub mod codec;
pub mod compaction;
pub mod log;
pub mod manifest;
pub mod segment;
pub mod storage;

mod error;
mod types;

pub use error::{Result, StrataError};
pub use types::*;

/// Strata version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Records held in the log's write buffer until the next flush
    pub const BUFFERED_RECORDS_LIMIT: usize = 20;

    /// Records the log file holds before it becomes a level-0 segment
    pub const LOG_FILE_RECORD_LIMIT: usize = BUFFERED_RECORDS_LIMIT * 10;

    /// Highest level
    pub const MAX_LEVEL: usize = 7;

    /// Number of level slots (0..=MAX_LEVEL)
    pub const LEVEL_COUNT: usize = MAX_LEVEL + 1;

    /// One mebibyte
    pub const MB_SIZE: u64 = 1024 * 1024;

    /// Size ratio between levels
    pub const LEVEL_SIZE_RATIO: u64 = 10;

    /// Buffer used when streaming columns during a merge (32KB)
    pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

    /// Write buffer for segment output (4KB)
    pub const WRITE_BUFFER_SIZE: usize = 4 * 1024;
}
