//! Log writer implementation

use super::{LogConfig, LogReader, SyncPolicy};
use crate::{Record, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Buffered append-only writer for the ingestion log.
///
/// Takes `&mut self` everywhere: the engine's lock is what serialises the
/// append together with the counter updates.
pub struct LogWriter {
    path: PathBuf,
    config: LogConfig,
    file: BufWriter<File>,
    /// Rows appended since the last buffer flush
    buffered_records: usize,
    /// Rows that have reached the file
    file_records: usize,
    buffer_flushes: u64,
    last_sync: Instant,
}

impl LogWriter {
    /// Open the log at `path`, creating it if needed.
    ///
    /// Complete rows already in the file count towards the file limit; a
    /// torn final row is cut off.
    pub fn open(path: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        config.validate()?;

        let recovery = LogReader::new(&path).recover()?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if recovery.torn_bytes > 0 {
            file.set_len(recovery.valid_len)?;
            file.sync_all()?;
        }
        if !recovery.records.is_empty() {
            info!(
                "Recovered {} logged records from {:?}",
                recovery.records.len(),
                path
            );
        }

        Ok(Self {
            path,
            config,
            file: BufWriter::new(file),
            buffered_records: 0,
            file_records: recovery.records.len(),
            buffer_flushes: 0,
            last_sync: Instant::now(),
        })
    }

    /// Append a record. Every `buffered_records_limit` appends the buffer is
    /// flushed to the file.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        record.write_to(&mut self.file)?;
        self.buffered_records += 1;

        if self.buffered_records >= self.config.buffered_records_limit {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Push buffered rows to the file and sync per policy
    pub fn flush_buffer(&mut self) -> Result<()> {
        if self.buffered_records == 0 {
            return Ok(());
        }

        self.file.flush()?;
        if self.should_sync() {
            self.file.get_ref().sync_all()?;
            self.last_sync = Instant::now();
        }

        self.file_records += self.buffered_records;
        self.buffered_records = 0;
        self.buffer_flushes += 1;
        debug!("Log buffer flushed, {} records in file", self.file_records);
        Ok(())
    }

    /// True once the file holds enough rows to become a segment
    pub fn is_full(&self) -> bool {
        self.file_records >= self.config.file_record_limit
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffered_records(&self) -> usize {
        self.buffered_records
    }

    pub fn file_records(&self) -> usize {
        self.file_records
    }

    /// Number of buffer flushes since open
    pub fn buffer_flushes(&self) -> u64 {
        self.buffer_flushes
    }

    fn should_sync(&self) -> bool {
        match self.config.sync_policy {
            SyncPolicy::OnFlush => true,
            SyncPolicy::Interval { millis } => {
                self.last_sync.elapsed().as_millis() >= millis as u128
            }
            SyncPolicy::None => false,
        }
    }
}
