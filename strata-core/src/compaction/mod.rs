//! Level compaction for the LSM tree
//!
//! Each level holds at most one segment. A fresh flush output lands in
//! level 0 (merged with whatever already lives there); afterwards levels are
//! checked bottom-up and level `L` is merged into `L + 1` while its segment is
//! larger than `base_level_bytes * level_size_multiplier^L`.

mod merge;

pub use merge::merge_segments;

use crate::manifest::{Manifest, ManifestStore};
use crate::segment::{self, SegmentMeta, SegmentReader, TEMP_SUFFIX};
use crate::{Result, StrataError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Compaction configuration
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Size bound of level 0 in bytes
    pub base_level_bytes: u64,
    /// Size multiplier between levels
    pub level_size_multiplier: u64,
    /// Highest level; segments there are never compacted further
    pub max_level: usize,
    /// Buffer used to stream columns between files
    pub copy_buffer_size: usize,
    /// Write buffer of the output segment
    pub write_buffer_size: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            base_level_bytes: crate::config::MB_SIZE,
            level_size_multiplier: crate::config::LEVEL_SIZE_RATIO,
            max_level: crate::config::MAX_LEVEL,
            copy_buffer_size: crate::config::COPY_BUFFER_SIZE,
            write_buffer_size: crate::config::WRITE_BUFFER_SIZE,
        }
    }
}

impl CompactionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_level > crate::config::MAX_LEVEL {
            return Err(StrataError::Config(format!(
                "max_level {} exceeds {}",
                self.max_level,
                crate::config::MAX_LEVEL
            )));
        }
        if self.copy_buffer_size < crate::codec::INT64_LENGTH {
            return Err(StrataError::Config("copy_buffer_size too small".into()));
        }
        if self.level_size_multiplier == 0 || self.base_level_bytes == 0 {
            return Err(StrataError::Config("level sizes must be positive".into()));
        }
        Ok(())
    }

    /// Size above which the segment at `level` is compacted upward
    pub fn target_size_for_level(&self, level: usize) -> u64 {
        self.level_size_multiplier
            .saturating_pow(level as u32)
            .saturating_mul(self.base_level_bytes)
    }
}

/// Level in the LSM tree
#[derive(Debug, Clone)]
pub struct Level {
    pub level: usize,
    pub segment: Option<SegmentMeta>,
}

/// Owns the levels, the manifest describing them, and segment ID allocation
pub struct Compactor {
    dir: PathBuf,
    config: CompactionConfig,
    levels: Vec<Level>,
    manifest: Manifest,
    store: ManifestStore,
    next_segment_id: u64,
}

impl Compactor {
    /// Load the levels recorded in the manifest under `dir`.
    ///
    /// Segment files the manifest does not reference (outputs of an
    /// interrupted flush or merge) and leftover temp files are deleted.
    pub fn open(dir: impl AsRef<Path>, config: CompactionConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = ManifestStore::new(&dir);
        let mut manifest = store.load()?;
        if manifest.is_compacting() {
            warn!("Manifest was stored mid-compaction; prior segments stay authoritative");
            manifest.set_compacting(false);
        }

        let mut levels: Vec<Level> = (0..=crate::config::MAX_LEVEL)
            .map(|level| Level { level, segment: None })
            .collect();
        let mut max_id = 0u64;

        for level in manifest.live_levels() {
            let id = manifest.segment_id(level).ok_or_else(|| {
                StrataError::FormatMismatch(format!("level {} has no segment id", level))
            })?;
            let meta = SegmentMeta::load(segment::segment_path(&dir, id), id, level)?;
            debug!("Level {} -> segment {} ({} bytes)", level, id, meta.file_size);
            levels[level].segment = Some(meta);
            max_id = max_id.max(id);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_temp = path.extension().map_or(false, |e| e == TEMP_SUFFIX);
            match segment::parse_segment_id(&path) {
                Some(id) => {
                    max_id = max_id.max(id);
                    let live = levels
                        .iter()
                        .any(|l| l.segment.as_ref().map_or(false, |s| s.id == id));
                    if !live {
                        warn!("Removing orphaned segment {:?}", path);
                        fs::remove_file(&path)?;
                    }
                }
                None if is_temp => {
                    warn!("Removing unfinished file {:?}", path);
                    fs::remove_file(&path)?;
                }
                None => {}
            }
        }

        Ok(Self {
            dir,
            config,
            levels,
            manifest,
            store,
            next_segment_id: max_id + 1,
        })
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Segment currently live at `level`
    pub fn segment(&self, level: usize) -> Option<&SegmentMeta> {
        self.levels.get(level).and_then(|l| l.segment.as_ref())
    }

    /// Hand out the next segment ID
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    /// Check if the segment at `level` has outgrown its bound
    pub fn needs_compaction(&self, level: usize) -> bool {
        level < self.config.max_level
            && self
                .segment(level)
                .map_or(false, |s| s.file_size > self.config.target_size_for_level(level))
    }

    /// Make a freshly flushed segment the live level-0 segment.
    ///
    /// If level 0 is occupied the two are merged into a replacement; the
    /// fresh file is discarded either way once the manifest is durable. The
    /// same manifest store marks `log_generation` as flushed.
    pub fn install_flush(
        &mut self,
        fresh: SegmentMeta,
        log_generation: u64,
    ) -> Result<SegmentMeta> {
        let Some(current) = self.segment(0).cloned() else {
            let mut manifest = self.manifest.clone();
            manifest.set_level(0);
            manifest.set_segment(0, fresh.id);
            manifest.set_flushed_log(log_generation);
            if let Err(e) = self.commit(manifest) {
                discard(&fresh.path);
                return Err(e);
            }
            let meta = SegmentMeta { level: 0, ..fresh };
            self.levels[0].segment = Some(meta.clone());
            info!("Segment {} installed at L0", meta.id);
            return Ok(meta);
        };

        // merge_into deletes both inputs once the manifest is stored
        self.merge_into(&current, &fresh, 0, Some(log_generation)).map_err(|e| {
            discard(&fresh.path);
            e
        })
    }

    /// Run compactions bottom-up until every level is within its bound.
    ///
    /// Returns the number of level moves performed.
    pub fn compact(&mut self) -> Result<usize> {
        let mut moves = 0;
        for level in 0..self.config.max_level {
            if !self.needs_compaction(level) {
                break;
            }
            self.compact_level(level)?;
            moves += 1;
        }
        Ok(moves)
    }

    /// Move the segment at `level` into `level + 1`, merging if the target
    /// is occupied
    pub fn compact_level(&mut self, level: usize) -> Result<()> {
        let target_level = level + 1;
        if target_level > self.config.max_level {
            return Err(StrataError::Compaction(format!(
                "level {} is the highest level",
                level
            )));
        }
        let source = self.segment(level).cloned().ok_or_else(|| {
            StrataError::Compaction(format!("level {} has no segment", level))
        })?;

        let Some(target) = self.segment(target_level).cloned() else {
            let mut manifest = self.manifest.clone();
            manifest.unset_level(level);
            manifest.set_segment(level, 0);
            manifest.set_level(target_level);
            manifest.set_segment(target_level, source.id);
            self.commit(manifest)?;

            self.levels[level].segment = None;
            self.levels[target_level].segment = Some(SegmentMeta {
                level: target_level,
                ..source
            });
            info!("Promoted segment {} from L{} to L{}", source.id, level, target_level);
            return Ok(());
        };

        self.merge_into(&target, &source, target_level, None).map(|_| ())
    }

    /// Merge `first` and `second` into a new segment at `target_level`,
    /// replacing both in the levels and the manifest
    fn merge_into(
        &mut self,
        first: &SegmentMeta,
        second: &SegmentMeta,
        target_level: usize,
        flushed_log: Option<u64>,
    ) -> Result<SegmentMeta> {
        if self.manifest.is_compacting() {
            return Err(StrataError::Compaction("a compaction is already running".into()));
        }
        self.manifest.set_compacting(true);
        let result = self.write_merged(first, second, target_level);
        self.manifest.set_compacting(false);
        let merged = result?;

        let mut manifest = self.manifest.clone();
        for meta in [first, second] {
            if meta.level != target_level && self.manifest.segment_id(meta.level) == Some(meta.id) {
                manifest.unset_level(meta.level);
                manifest.set_segment(meta.level, 0);
            }
        }
        manifest.set_level(target_level);
        manifest.set_segment(target_level, merged.id);
        if let Some(generation) = flushed_log {
            manifest.set_flushed_log(generation);
        }

        if let Err(e) = self.commit(manifest) {
            discard(&merged.path);
            return Err(e);
        }

        for meta in [first, second] {
            if let Some(slot) = self.levels.get_mut(meta.level) {
                if slot.segment.as_ref().map_or(false, |s| s.id == meta.id) {
                    slot.segment = None;
                }
            }
            discard(&meta.path);
        }
        self.levels[target_level].segment = Some(merged.clone());

        info!(
            "Merged segments {} (L{}) and {} (L{}) into {} at L{} ({} records, {} bytes)",
            first.id,
            first.level,
            second.id,
            second.level,
            merged.id,
            target_level,
            merged.header.total_records,
            merged.file_size
        );
        Ok(merged)
    }

    fn write_merged(
        &mut self,
        first: &SegmentMeta,
        second: &SegmentMeta,
        target_level: usize,
    ) -> Result<SegmentMeta> {
        let mut a = SegmentReader::open(&first.path)?;
        let mut b = SegmentReader::open(&second.path)?;

        let id = self.allocate_id();
        let copy_buffer_size = self.config.copy_buffer_size;
        let mut header = None;
        let path = segment::write_segment(&self.dir, id, self.config.write_buffer_size, |w| {
            header = Some(merge_segments(&mut a, &mut b, w, copy_buffer_size)?);
            Ok(())
        })?;
        let header =
            header.ok_or_else(|| StrataError::Compaction("merge produced no header".into()))?;

        let file_size = fs::metadata(&path)?.len();
        Ok(SegmentMeta {
            id,
            level: target_level,
            path,
            header,
            file_size,
        })
    }

    /// Persist `manifest` and adopt it; `manifest` always goes out with the
    /// compacting flag cleared
    fn commit(&mut self, mut manifest: Manifest) -> Result<()> {
        manifest.set_compacting(false);
        self.store.store(&manifest)?;
        self.manifest = manifest;
        Ok(())
    }
}

/// Delete a superseded file; failure only leaves an orphan for the next open
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete superseded segment {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentBuilder;
    use crate::{MetricKey, Record};
    use tempfile::TempDir;

    fn config(base: u64) -> CompactionConfig {
        CompactionConfig {
            base_level_bytes: base,
            level_size_multiplier: 10,
            copy_buffer_size: 64,
            write_buffer_size: 256,
            ..Default::default()
        }
    }

    /// Install `records` as if flushed from log generation `id`
    fn flush(compactor: &mut Compactor, records: Vec<Record>) -> SegmentMeta {
        let id = compactor.allocate_id();
        let dir = compactor.dir.clone();
        let fresh = SegmentBuilder::from_records(records)
            .finish(&dir, id, 0, 256)
            .unwrap();
        compactor.install_flush(fresh, id).unwrap()
    }

    fn all_records(meta: &SegmentMeta) -> Vec<Record> {
        SegmentReader::open(&meta.path).unwrap().read_all().unwrap()
    }

    #[test]
    fn test_target_sizes() {
        let c = CompactionConfig::default();
        assert_eq!(c.target_size_for_level(0), 1024 * 1024);
        assert_eq!(c.target_size_for_level(1), 10 * 1024 * 1024);
        assert_eq!(c.target_size_for_level(3), 1000 * 1024 * 1024);
    }

    #[test]
    fn test_first_flush_becomes_level_zero() {
        let temp_dir = TempDir::new().unwrap();
        let mut compactor = Compactor::open(temp_dir.path(), config(1 << 20)).unwrap();

        let meta = flush(&mut compactor, vec![Record::new(1, "a", "x")]);
        assert_eq!(meta.level, 0);
        assert!(compactor.manifest().level_exists(0));
        assert_eq!(compactor.manifest().segment_id(0), Some(meta.id));
        assert_eq!(compactor.manifest().flushed_log(), meta.id);
        assert_eq!(compactor.compact().unwrap(), 0);
    }

    #[test]
    fn test_second_flush_merges_into_level_zero() {
        let temp_dir = TempDir::new().unwrap();
        let mut compactor = Compactor::open(temp_dir.path(), config(1 << 20)).unwrap();

        let first = flush(&mut compactor, vec![Record::new(1, "a", "x"), Record::new(2, "b", "y")]);
        let second = flush(&mut compactor, vec![Record::new(3, "a", "z")]);

        assert_ne!(first.id, second.id);
        assert!(!first.path.exists());
        // the merged replacement took the next id after the second flush
        assert_eq!(compactor.manifest().flushed_log(), second.id - 1);
        assert_eq!(second.header.total_records, 3);
        assert_eq!(second.header.key_count, 2);

        let a: Vec<_> = all_records(&second)
            .into_iter()
            .filter(|r| r.key == MetricKey::from_name("a"))
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(a, vec![1, 3]);

        // only the live segment and the manifest remain
        let files = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(files, 2);
    }

    #[test]
    fn test_compaction_moves_level_ownership() {
        let temp_dir = TempDir::new().unwrap();
        // every segment outgrows L0, none outgrows L1
        let mut compactor = Compactor::open(temp_dir.path(), config(16)).unwrap();

        let first = flush(&mut compactor, vec![Record::new(1, "a", "x")]);
        assert_eq!(compactor.compact().unwrap(), 1);
        assert!(!compactor.manifest().level_exists(0));
        assert!(compactor.manifest().level_exists(1));
        assert_eq!(compactor.segment(1).unwrap().id, first.id);

        flush(&mut compactor, vec![Record::new(5, "b", "y")]);
        assert_eq!(compactor.compact().unwrap(), 1);
        assert!(!compactor.manifest().level_exists(0));
        assert!(compactor.manifest().level_exists(1));

        let merged = compactor.segment(1).unwrap().clone();
        assert_eq!(merged.header.total_records, 2);
        assert_eq!(merged.header.start, 1);
        assert_eq!(merged.header.end, 5);
        assert!(!first.path.exists());

        let reloaded = ManifestStore::new(temp_dir.path()).load().unwrap();
        assert_eq!(&reloaded, compactor.manifest());
    }

    #[test]
    fn test_cascade_stops_at_max_level() {
        let temp_dir = TempDir::new().unwrap();
        let mut cfg = config(1);
        cfg.max_level = 2;
        let mut compactor = Compactor::open(temp_dir.path(), cfg).unwrap();

        flush(&mut compactor, vec![Record::new(1, "a", "x")]);
        assert_eq!(compactor.compact().unwrap(), 2);
        assert!(compactor.manifest().level_exists(2));
        assert!(!compactor.needs_compaction(2));
        assert!(compactor.compact_level(2).is_err());
    }

    #[test]
    fn test_reopen_restores_levels_and_removes_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let live = {
            let mut compactor = Compactor::open(temp_dir.path(), config(1 << 20)).unwrap();
            flush(&mut compactor, vec![Record::new(1, "a", "x")])
        };

        let orphan = segment::segment_path(temp_dir.path(), 50);
        fs::write(&orphan, b"partial").unwrap();
        let temp = segment::temp_segment_path(temp_dir.path(), 51);
        fs::write(&temp, b"partial").unwrap();

        let mut compactor = Compactor::open(temp_dir.path(), config(1 << 20)).unwrap();
        assert_eq!(compactor.segment(0).unwrap().id, live.id);
        assert_eq!(compactor.segment(0).unwrap().header, live.header);
        assert!(!orphan.exists());
        assert!(!temp.exists());
        assert!(compactor.allocate_id() > 50);
    }

    #[test]
    fn test_failed_merge_leaves_state_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let mut compactor = Compactor::open(temp_dir.path(), config(16)).unwrap();

        let older = flush(&mut compactor, vec![Record::new(1, "a", "first-value")]);
        compactor.compact().unwrap();
        assert_eq!(compactor.segment(1).unwrap().id, older.id);

        // damage the tail of the L1 segment so streaming its values fails
        let len = fs::metadata(&older.path).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&older.path).unwrap();
        file.set_len(len - 4).unwrap();
        drop(file);

        let newer = flush(&mut compactor, vec![Record::new(9, "a", "second")]);
        let older_bytes = fs::read(&older.path).unwrap();
        let newer_bytes = fs::read(&newer.path).unwrap();
        let manifest_before = compactor.manifest().clone();
        let manifest_path = temp_dir.path().join(crate::manifest::MANIFEST_FILE_NAME);
        let stored_before = fs::read(&manifest_path).unwrap();

        let err = compactor.compact().unwrap_err();
        assert!(matches!(err, StrataError::TruncatedInput { .. }));

        assert_eq!(fs::read(&older.path).unwrap(), older_bytes);
        assert_eq!(fs::read(&newer.path).unwrap(), newer_bytes);
        assert_eq!(compactor.manifest(), &manifest_before);
        assert!(!compactor.manifest().is_compacting());
        assert_eq!(fs::read(&manifest_path).unwrap(), stored_before);
        assert_eq!(compactor.segment(0).unwrap().id, newer.id);
        assert_eq!(compactor.segment(1).unwrap().id, older.id);

        // no half-written output left behind
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 3, "{:?}", names);
    }
}
