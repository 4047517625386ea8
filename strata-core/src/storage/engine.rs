//! Storage engine - owns the log, the levels and the manifest

use super::StorageConfig;
use crate::compaction::Compactor;
use crate::log::{self, LogReader, LogWriter};
use crate::manifest::Manifest;
use crate::segment::{sync_dir, SegmentBuilder, SegmentMeta};
use crate::{Record, Result, StrataError, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Strata storage engine.
///
/// All mutable state sits behind one lock: an append and the counter
/// updates it causes happen atomically, and flush and compaction run
/// synchronously inside the write that crossed the threshold.
pub struct Engine {
    config: StorageConfig,
    inner: Mutex<EngineInner>,
}

struct EngineInner {
    log: LogWriter,
    log_generation: u64,
    compactor: Compactor,
    segments_flushed: u64,
    compactions: u64,
    flush_failures: u64,
    compaction_failures: u64,
}

impl Engine {
    /// Open the engine in `config.data_dir`, recovering levels from the
    /// manifest and unflushed records from the log
    pub fn open(config: StorageConfig) -> Result<Self> {
        let dir = config.data_dir.as_path();
        fs::create_dir_all(dir)?;

        let compactor = Compactor::open(dir, config.compaction.clone())?;
        let log_generation = log::recover_generation(dir, compactor.manifest().flushed_log())?;
        let log = LogWriter::open(log::log_path(dir, log_generation), config.log.clone())?;
        sync_dir(dir)?;

        info!(
            "Opened storage at {:?}: levels {:#010b}, log generation {} with {} records",
            dir,
            compactor.manifest().level_mask(),
            log_generation,
            log.file_records()
        );

        let engine = Self {
            config,
            inner: Mutex::new(EngineInner {
                log,
                log_generation,
                compactor,
                segments_flushed: 0,
                compactions: 0,
                flush_failures: 0,
                compaction_failures: 0,
            }),
        };

        {
            let mut inner = engine.inner.lock();
            if inner.log.is_full() {
                engine.try_flush(&mut inner);
            }
        }

        Ok(engine)
    }

    /// Append a value for `name`, stamped with the current unix time
    pub fn write(&self, name: &str, value: &str) -> Result<()> {
        self.write_at(chrono::Utc::now().timestamp(), name, value)
    }

    /// Append a value for `name` at an explicit timestamp.
    ///
    /// The result covers the append only. A flush or compaction this write
    /// triggers reports failure through the log and `EngineStats`; the
    /// record is already durable in the log at that point.
    pub fn write_at(&self, timestamp: Timestamp, name: &str, value: &str) -> Result<()> {
        let record = Record::new(timestamp, name, value.as_bytes());

        let mut inner = self.inner.lock();
        inner.log.append(&record)?;

        if inner.log.is_full() {
            self.try_flush(&mut inner);
        }
        Ok(())
    }

    /// Force everything logged so far into a level-0 segment.
    ///
    /// Returns `false` if the log was empty. Compaction failures afterwards
    /// are only counted.
    pub fn flush(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.log.flush_buffer()?;
        if inner.log.file_records() == 0 {
            return Ok(false);
        }
        if let Err(e) = self.flush_locked(&mut inner) {
            inner.flush_failures += 1;
            return Err(e);
        }
        Ok(true)
    }

    /// Current manifest
    pub fn manifest(&self) -> Manifest {
        self.inner.lock().compactor.manifest().clone()
    }

    /// Segment live at `level`
    pub fn segment(&self, level: usize) -> Option<SegmentMeta> {
        self.inner.lock().compactor.segment(level).cloned()
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        let inner = self.inner.lock();
        let levels = inner
            .compactor
            .levels()
            .iter()
            .filter_map(|l| {
                l.segment.as_ref().map(|s| LevelStats {
                    level: l.level,
                    segment_id: s.id,
                    records: s.header.total_records,
                    keys: s.header.key_count,
                    size_bytes: s.file_size,
                })
            })
            .collect();

        EngineStats {
            data_dir: self.config.data_dir.display().to_string(),
            log_generation: inner.log_generation,
            buffered_records: inner.log.buffered_records(),
            logged_records: inner.log.file_records(),
            buffer_flushes: inner.log.buffer_flushes(),
            segments_flushed: inner.segments_flushed,
            compactions: inner.compactions,
            flush_failures: inner.flush_failures,
            compaction_failures: inner.compaction_failures,
            levels,
        }
    }

    /// Flush a full log; on failure the rows stay logged and the next
    /// write tries again
    fn try_flush(&self, inner: &mut EngineInner) {
        if let Err(e) = self.flush_locked(inner) {
            inner.flush_failures += 1;
            error!("Flush of {:?} failed, records stay logged: {}", inner.log.path(), e);
        }
    }

    /// Turn the current log generation into a level-0 segment and continue
    /// in the next generation.
    ///
    /// The next log is created before the install so that a failure after
    /// the manifest store cannot leave appends going to a flushed log.
    fn flush_locked(&self, inner: &mut EngineInner) -> Result<()> {
        inner.log.flush_buffer()?;
        let records = LogReader::new(inner.log.path()).read_all()?;
        if records.is_empty() {
            return Err(StrataError::EmptyFlush);
        }

        let dir = self.config.data_dir.as_path();
        let count = records.len();
        let generation = inner.log_generation;
        let next_path = log::log_path(dir, generation + 1);
        let next = LogWriter::open(&next_path, self.config.log.clone())?;

        let installed =
            sync_dir(dir).and_then(|_| self.install_records(inner, records, generation));
        let level0 = match installed {
            Ok(meta) => meta,
            Err(e) => {
                drop(next);
                remove_log(&next_path);
                return Err(e);
            }
        };

        let flushed = std::mem::replace(&mut inner.log, next);
        inner.log_generation = generation + 1;
        inner.segments_flushed += 1;
        let flushed_path = flushed.path().to_path_buf();
        drop(flushed);
        // a leftover is removed on the next open, the manifest marks it flushed
        remove_log(&flushed_path);

        info!(
            "Flushed {} records of log generation {} into L0 segment {} ({} bytes)",
            count, generation, level0.id, level0.file_size
        );

        match inner.compactor.compact() {
            Ok(moves) => inner.compactions += moves as u64,
            Err(e) => {
                inner.compaction_failures += 1;
                error!("Compaction after flush failed: {}", e);
            }
        }
        Ok(())
    }

    fn install_records(
        &self,
        inner: &mut EngineInner,
        records: Vec<Record>,
        generation: u64,
    ) -> Result<SegmentMeta> {
        let id = inner.compactor.allocate_id();
        let fresh = SegmentBuilder::from_records(records).finish(
            &self.config.data_dir,
            id,
            0,
            self.config.compaction.write_buffer_size,
        )?;
        inner.compactor.install_flush(fresh, generation)
    }
}

fn remove_log(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to delete log {:?}: {}", path, e);
    }
}

/// Per-level statistics
#[derive(Debug, Clone, Serialize)]
pub struct LevelStats {
    pub level: usize,
    pub segment_id: u64,
    pub records: u32,
    pub keys: u32,
    pub size_bytes: u64,
}

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub data_dir: String,
    pub log_generation: u64,
    pub buffered_records: usize,
    pub logged_records: usize,
    pub buffer_flushes: u64,
    pub segments_flushed: u64,
    pub compactions: u64,
    pub flush_failures: u64,
    pub compaction_failures: u64,
    pub levels: Vec<LevelStats>,
}
