//! Log reader for flushing and recovery

use crate::{Record, Result, StrataError};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Reads the log through its own handle, independent of the writer's cursor
pub struct LogReader {
    path: PathBuf,
}

/// Outcome of scanning a log that may end in a torn row
#[derive(Debug, Default)]
pub struct LogRecovery {
    /// Every complete row, in arrival order
    pub records: Vec<Record>,
    /// Byte length of the complete rows
    pub valid_len: u64,
    /// Bytes after `valid_len` belonging to an incomplete row
    pub torn_bytes: u64,
}

impl LogReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read every row. Any incomplete row is an error.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let mut reader = match File::open(&self.path) {
            Ok(file) => BufReader::new(file),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(record) = Record::read_from(&mut reader)? {
            records.push(record);
        }
        Ok(records)
    }

    /// Read every complete row, tolerating a torn final row left by a crash
    pub fn recover(&self) -> Result<LogRecovery> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LogRecovery::default()),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut recovery = LogRecovery::default();
        loop {
            match Record::read_from(&mut reader) {
                Ok(Some(record)) => {
                    recovery.valid_len += record.encoded_len() as u64;
                    recovery.records.push(record);
                }
                Ok(None) => break,
                Err(StrataError::TruncatedInput { .. }) => {
                    recovery.torn_bytes = file_len - recovery.valid_len;
                    warn!(
                        "Torn row at offset {} in {:?} ({} bytes)",
                        recovery.valid_len, self.path, recovery.torn_bytes
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(recovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_missing_log_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let reader = LogReader::new(temp_dir.path().join("absent.log"));
        assert!(reader.read_all().unwrap().is_empty());
        assert_eq!(reader.recover().unwrap().valid_len, 0);
    }

    #[test]
    fn test_recover_stops_at_torn_row() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("torn.log");

        let mut data = Vec::new();
        for i in 0..3 {
            Record::new(i, "m", "value").write_to(&mut data).unwrap();
        }
        let complete = data.len() as u64;
        Record::new(3, "m", "value").write_to(&mut data).unwrap();
        data.truncate(data.len() - 2);
        File::create(&path).unwrap().write_all(&data).unwrap();

        let reader = LogReader::new(&path);
        assert!(matches!(
            reader.read_all(),
            Err(StrataError::TruncatedInput { .. })
        ));

        let recovery = reader.recover().unwrap();
        assert_eq!(recovery.records.len(), 3);
        assert_eq!(recovery.valid_len, complete);
        assert_eq!(recovery.torn_bytes, data.len() as u64 - complete);
    }
}
