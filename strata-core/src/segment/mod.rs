//! Immutable column-oriented segment files
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [start_ts:8][end_ts:8][total_records:4][key_count:4]
//! [key_1:16] .. [key_k:16]                      sorted byte-wise
//! [count_1:4] .. [count_k:4]
//! [ts_1_1:8] .. [ts_1_c1:8] [ts_2_1:8] ..       grouped by key, ascending
//! [len_1_1:4] .. [len_k_ck:4]
//! [val_1_1] .. [val_k_ck]
//! ```
//!
//! Every section offset follows from the header and the count array, so a
//! reader never has to scan ahead.

mod builder;
mod reader;

pub use builder::SegmentBuilder;
pub use reader::SegmentReader;

use crate::codec::{SegmentHeader, HEADER_SIZE, INT64_LENGTH, INT_LENGTH};
use crate::{Result, StrataError, KEY_LENGTH};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Extension of live segment files
pub const SEGMENT_EXTENSION: &str = "lsm";

/// Suffix of a segment still being written
pub const TEMP_SUFFIX: &str = "tmp";

/// Segment metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMeta {
    /// Unique, monotonically assigned ID
    pub id: u64,
    /// Level the segment currently lives in
    pub level: usize,
    /// File path
    pub path: PathBuf,
    /// Decoded header
    pub header: SegmentHeader,
    /// File size in bytes
    pub file_size: u64,
}

impl SegmentMeta {
    /// Read the metadata of an existing segment file
    pub fn load(path: PathBuf, id: u64, level: usize) -> Result<Self> {
        let mut file = File::open(&path)?;
        let header = SegmentHeader::read_from(&mut file)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            id,
            level,
            path,
            header,
            file_size,
        })
    }
}

/// Byte offsets of the sections of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    key_count: u64,
    total_records: u64,
}

impl SegmentLayout {
    pub fn new(header: &SegmentHeader) -> Self {
        Self {
            key_count: header.key_count as u64,
            total_records: header.total_records as u64,
        }
    }

    pub fn keys(&self) -> u64 {
        HEADER_SIZE as u64
    }

    pub fn counts(&self) -> u64 {
        self.keys() + self.key_count * KEY_LENGTH as u64
    }

    pub fn timestamps(&self) -> u64 {
        self.counts() + self.key_count * INT_LENGTH as u64
    }

    pub fn lengths(&self) -> u64 {
        self.timestamps() + self.total_records * INT64_LENGTH as u64
    }

    pub fn values(&self) -> u64 {
        self.lengths() + self.total_records * INT_LENGTH as u64
    }
}

/// File name for a segment ID
pub fn segment_file_name(id: u64) -> String {
    format!("{:020}.{}", id, SEGMENT_EXTENSION)
}

/// Path of a live segment inside `dir`
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(segment_file_name(id))
}

/// Path a segment is written to before it is sealed
pub fn temp_segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.{}", segment_file_name(id), TEMP_SUFFIX))
}

/// Parse the ID out of a live segment path
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_suffix(SEGMENT_EXTENSION))
        .and_then(|s| s.strip_suffix('.'))
        .and_then(|s| s.parse().ok())
}

/// Finish a segment written to its temp path: flush, fsync, rename into
/// place and sync the directory.
pub(crate) fn seal(dir: &Path, id: u64, writer: BufWriter<File>) -> Result<PathBuf> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    let path = segment_path(dir, id);
    fs::rename(temp_segment_path(dir, id), &path)?;
    sync_dir(dir)?;
    Ok(path)
}

/// Flush a directory entry change to disk
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Write a segment image with `write`, sealing it on success and removing
/// the temp file on failure.
pub(crate) fn write_segment<F>(dir: &Path, id: u64, buffer_size: usize, write: F) -> Result<PathBuf>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let temp_path = temp_segment_path(dir, id);
    let result = File::create(&temp_path).map_err(StrataError::from).and_then(|file| {
        let mut writer = BufWriter::with_capacity(buffer_size, file);
        write(&mut writer)?;
        writer.flush()?;
        seal(dir, id, writer)
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
