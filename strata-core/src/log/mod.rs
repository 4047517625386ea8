//! Append-only ingestion log
//!
//! Every write lands here first as a row-encoded record, in arrival order.
//! Rows are buffered in memory and pushed to the file in fixed-size batches;
//! once the file holds enough rows the engine turns its contents into a
//! level-0 segment and continues in a new file.
//!
//! Log files are named by generation (`{generation:020}.log`). The manifest
//! records the newest generation already flushed into a segment, so a log
//! left behind by a crash after the manifest store is recognised and never
//! replayed twice.

mod reader;
mod writer;

pub use reader::{LogReader, LogRecovery};
pub use writer::LogWriter;

use crate::{Result, StrataError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extension of log files
pub const LOG_EXTENSION: &str = "log";

/// File name of the log of `generation`
pub fn log_file_name(generation: u64) -> String {
    format!("{:020}.{}", generation, LOG_EXTENSION)
}

/// Path of the log of `generation` inside `dir`
pub fn log_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(log_file_name(generation))
}

/// Parse the generation out of a log path
pub fn parse_log_generation(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_suffix(LOG_EXTENSION))
        .and_then(|s| s.strip_suffix('.'))
        .and_then(|s| s.parse().ok())
}

/// Find the generation to append to after a restart.
///
/// Logs of generation `flushed` or older already live in a segment and are
/// deleted. At most one newer log may exist; without one the next
/// generation starts empty.
pub fn recover_generation(dir: &Path, flushed: u64) -> Result<u64> {
    let mut pending = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(generation) = parse_log_generation(&path) else {
            continue;
        };
        if generation <= flushed {
            warn!("Removing log {:?}, already flushed into a segment", path);
            fs::remove_file(&path)?;
        } else {
            pending.push(generation);
        }
    }

    match pending.as_slice() {
        [] => Ok(flushed + 1),
        [generation] => Ok(*generation),
        _ => Err(StrataError::FormatMismatch(format!(
            "found {} unflushed logs, expected at most one",
            pending.len()
        ))),
    }
}

/// When buffered rows reach the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every buffer flush (safest)
    OnFlush,
    /// fsync on buffer flush only if the last sync is older than `millis`
    Interval { millis: u64 },
    /// Never sync (OS decides, fastest, least safe)
    None,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::OnFlush
    }
}

/// Log configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Rows held in memory before the buffer is flushed to the file
    pub buffered_records_limit: usize,
    /// Rows the file holds before it is converted into a segment
    pub file_record_limit: usize,
    /// Sync policy
    pub sync_policy: SyncPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            buffered_records_limit: crate::config::BUFFERED_RECORDS_LIMIT,
            file_record_limit: crate::config::LOG_FILE_RECORD_LIMIT,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl LogConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.buffered_records_limit == 0 {
            return Err(StrataError::Config(
                "buffered_records_limit must be positive".into(),
            ));
        }
        if self.file_record_limit < self.buffered_records_limit {
            return Err(StrataError::Config(format!(
                "file_record_limit {} is below buffered_records_limit {}",
                self.file_record_limit, self.buffered_records_limit
            )));
        }
        Ok(())
    }
}
