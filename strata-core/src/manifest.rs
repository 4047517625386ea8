//! Level manifest: which levels hold a live segment
//!
//! On-disk record (80 bytes, little-endian):
//!
//! ```text
//! [state:4][segment_id(L0):8] .. [segment_id(L7):8][flushed_log:8][crc32:4]
//! ```
//!
//! The state word carries one presence bit per level in bits `0..=7` and the
//! compacting flag in bit 31. Loading moves bit 31 into the flag and clears it
//! from the mask; storing folds the flag back into bit 31, so store and load
//! are exact inverses. A segment ID of 0 means "no segment". `flushed_log` is
//! the newest log generation whose rows live in a segment (0 for none).

use crate::codec::{decode_u32, INT64_LENGTH, INT_LENGTH};
use crate::config::LEVEL_COUNT;
use crate::segment::sync_dir;
use crate::{Result, StrataError};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// File name of the manifest inside the data directory
pub const MANIFEST_FILE_NAME: &str = "MANIFEST";

/// Bit of the state word holding the compacting flag
pub const COMPACTING_BIT: u32 = 1 << 31;

/// Bits of the state word holding level presence
pub const LEVEL_MASK: u32 = (1 << LEVEL_COUNT) - 1;

/// Encoded manifest size
pub const MANIFEST_SIZE: usize = INT_LENGTH + (LEVEL_COUNT + 1) * INT64_LENGTH + INT_LENGTH;

/// In-memory manifest state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    levels: u32,
    compacting: bool,
    segments: [u64; LEVEL_COUNT],
    flushed_log: u64,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level_exists(&self, level: usize) -> bool {
        debug_assert!(level < LEVEL_COUNT, "level {} out of range", level);
        let bit = 1 << level;
        self.levels & bit == bit
    }

    pub fn set_level(&mut self, level: usize) {
        debug_assert!(level < LEVEL_COUNT, "level {} out of range", level);
        self.levels |= 1 << level;
    }

    pub fn unset_level(&mut self, level: usize) {
        debug_assert!(level < LEVEL_COUNT, "level {} out of range", level);
        self.levels &= !(1 << level);
    }

    pub fn is_compacting(&self) -> bool {
        self.compacting
    }

    pub fn set_compacting(&mut self, compacting: bool) {
        self.compacting = compacting;
    }

    /// Presence mask without the compacting flag
    pub fn level_mask(&self) -> u32 {
        self.levels
    }

    /// ID of the live segment at `level`
    pub fn segment_id(&self, level: usize) -> Option<u64> {
        match self.segments[level] {
            0 => None,
            id => Some(id),
        }
    }

    /// Record which segment lives at `level` (0 clears it)
    pub fn set_segment(&mut self, level: usize, id: u64) {
        self.segments[level] = id;
    }

    /// Newest log generation already flushed into a segment
    pub fn flushed_log(&self) -> u64 {
        self.flushed_log
    }

    pub fn set_flushed_log(&mut self, generation: u64) {
        self.flushed_log = generation;
    }

    /// Levels with a live segment, lowest first
    pub fn live_levels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..LEVEL_COUNT).filter(move |&l| self.level_exists(l))
    }

    /// Pack presence bits and flag into the state word
    pub fn encode_state(&self) -> u32 {
        let mut state = self.levels;
        if self.compacting {
            state |= COMPACTING_BIT;
        }
        state
    }

    /// Split a state word into presence bits and flag
    pub fn decode_state(state: u32) -> Result<(u32, bool)> {
        let compacting = state & COMPACTING_BIT == COMPACTING_BIT;
        let levels = state & !COMPACTING_BIT;
        if levels & !LEVEL_MASK != 0 {
            return Err(StrataError::FormatMismatch(format!(
                "manifest state {:#010x} has reserved bits set",
                state
            )));
        }
        Ok((levels, compacting))
    }

    pub fn encode(&self) -> [u8; MANIFEST_SIZE] {
        let mut buf = BytesMut::with_capacity(MANIFEST_SIZE);
        buf.put_u32_le(self.encode_state());
        for id in &self.segments {
            buf.put_u64_le(*id);
        }
        buf.put_u64_le(self.flushed_log);
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        let mut out = [0u8; MANIFEST_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MANIFEST_SIZE {
            return Err(StrataError::truncated(MANIFEST_SIZE, data.len()));
        }
        let body = &data[..MANIFEST_SIZE - INT_LENGTH];
        let expected = decode_u32(&data[MANIFEST_SIZE - INT_LENGTH..])?;
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(StrataError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = body;
        let (levels, compacting) = Self::decode_state(cursor.get_u32_le())?;
        let mut segments = [0u64; LEVEL_COUNT];
        for id in segments.iter_mut() {
            *id = cursor.get_u64_le();
        }
        let flushed_log = cursor.get_u64_le();

        let manifest = Self {
            levels,
            compacting,
            segments,
            flushed_log,
        };
        for level in 0..LEVEL_COUNT {
            if manifest.level_exists(level) != manifest.segment_id(level).is_some() {
                return Err(StrataError::FormatMismatch(format!(
                    "level {} presence bit disagrees with segment id {}",
                    level, manifest.segments[level]
                )));
            }
        }
        Ok(manifest)
    }
}

/// Persistent manifest storage
pub struct ManifestStore {
    dir: PathBuf,
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(MANIFEST_FILE_NAME);
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest, or an empty one if none was stored yet
    pub fn load(&self) -> Result<Manifest> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Manifest::new()),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::with_capacity(MANIFEST_SIZE);
        file.read_to_end(&mut data)?;
        Manifest::decode(&data)
    }

    /// Replace the stored manifest: write a temp file, fsync, rename
    pub fn store(&self, manifest: &Manifest) -> Result<()> {
        let temp_path = self.path.with_extension("tmp");
        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&manifest.encode())?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)?;
            sync_dir(&self.dir)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }
}
