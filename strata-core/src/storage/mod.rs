//! Storage engine - coordinates all storage components

mod engine;

pub use engine::{Engine, EngineStats, LevelStats};

use crate::compaction::CompactionConfig;
use crate::log::LogConfig;
use std::path::PathBuf;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory holding the log, the manifest and all segments
    pub data_dir: PathBuf,
    /// Log configuration
    pub log: LogConfig,
    /// Compaction configuration
    pub compaction: CompactionConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log: LogConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}
