//! End-to-end tests for the storage engine

use strata_core::compaction::CompactionConfig;
use strata_core::log::{log_path, LogConfig, SyncPolicy};
use strata_core::segment::SegmentReader;
use strata_core::storage::{Engine, StorageConfig};
use strata_core::MetricKey;
use tempfile::TempDir;

fn default_config(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}

/// 20-record log files and a 1KB level 0
fn small_config(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        data_dir: dir.path().to_path_buf(),
        log: LogConfig {
            buffered_records_limit: 5,
            file_record_limit: 20,
            sync_policy: SyncPolicy::None,
        },
        compaction: CompactionConfig {
            base_level_bytes: 1024,
            ..Default::default()
        },
    }
}

#[test]
fn test_reopen_replays_log() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(default_config(&temp_dir)).unwrap();
        for i in 0..150 {
            engine.write_at(i, "disk.io", "12.5").unwrap();
        }
        assert_eq!(engine.stats().segments_flushed, 0);
    }

    let engine = Engine::open(default_config(&temp_dir)).unwrap();
    assert_eq!(engine.stats().logged_records, 150);

    for i in 150..200 {
        engine.write_at(i, "disk.io", "12.5").unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.segments_flushed, 1);
    assert_eq!(stats.logged_records, 0);

    let meta = engine.segment(0).unwrap();
    assert_eq!(meta.header.total_records, 200);
    assert_eq!(meta.header.start, 0);
    assert_eq!(meta.header.end, 199);
}

#[test]
fn test_reopen_reloads_segments() {
    let temp_dir = TempDir::new().unwrap();

    let before = {
        let engine = Engine::open(small_config(&temp_dir)).unwrap();
        for i in 0..100 {
            engine.write_at(i, "net.rx", "1.5").unwrap();
        }
        engine.manifest()
    };

    let engine = Engine::open(small_config(&temp_dir)).unwrap();
    assert_eq!(engine.manifest(), before);

    let total: u32 = engine.stats().levels.iter().map(|l| l.records).sum();
    assert_eq!(total, 100);
}

#[test]
fn test_compaction_moves_level_ownership() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(small_config(&temp_dir)).unwrap();

    // one key, 3-byte values: a segment of n records is 44 + 15n bytes,
    // so level 0 outgrows 1KB at the fourth flush
    for i in 0..60 {
        engine.write_at(i, "cpu", "0.5").unwrap();
    }
    assert!(engine.manifest().level_exists(0));
    assert!(!engine.manifest().level_exists(1));
    assert_eq!(engine.segment(0).unwrap().header.total_records, 60);

    for i in 60..80 {
        engine.write_at(i, "cpu", "0.5").unwrap();
    }
    let manifest = engine.manifest();
    assert!(!manifest.level_exists(0));
    assert!(manifest.level_exists(1));
    assert!(!manifest.is_compacting());
    assert_eq!(engine.segment(1).unwrap().header.total_records, 80);
    assert_eq!(engine.stats().compactions, 1);

    for i in 80..100 {
        engine.write_at(i, "cpu", "0.5").unwrap();
    }
    assert!(engine.manifest().level_exists(0));
    assert!(engine.manifest().level_exists(1));

    // every timestamp survives, in order
    let mut timestamps = Vec::new();
    for level in [1, 0] {
        let meta = engine.segment(level).unwrap();
        let records = SegmentReader::open(&meta.path).unwrap().read_all().unwrap();
        assert!(records.iter().all(|r| r.key == MetricKey::from_name("cpu")));
        timestamps.extend(records.into_iter().map(|r| r.timestamp));
    }
    assert_eq!(timestamps, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_only_live_segments_remain_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(small_config(&temp_dir)).unwrap();

    for i in 0..200 {
        let name = format!("sensor.{}", i % 3);
        engine.write_at(i, &name, "21.0").unwrap();
    }

    let mut on_disk: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "lsm"))
        .collect();
    on_disk.sort();

    let mut live: Vec<_> = engine
        .stats()
        .levels
        .iter()
        .map(|l| engine.segment(l.level).unwrap().path)
        .collect();
    live.sort();

    assert_eq!(on_disk, live);
}

#[test]
fn test_flushed_log_is_not_replayed() {
    let temp_dir = TempDir::new().unwrap();
    let first_log = log_path(temp_dir.path(), 1);

    let stale = {
        let engine = Engine::open(small_config(&temp_dir)).unwrap();
        for i in 0..15 {
            engine.write_at(i, "mem.used", "64.0").unwrap();
        }
        let stale = std::fs::read(&first_log).unwrap();

        for i in 15..20 {
            engine.write_at(i, "mem.used", "64.0").unwrap();
        }
        assert_eq!(engine.manifest().flushed_log(), 1);
        assert_eq!(engine.segment(0).unwrap().header.total_records, 20);
        stale
    };

    // a crash between the manifest store and the log delete leaves the
    // flushed log behind
    std::fs::write(&first_log, stale).unwrap();

    let engine = Engine::open(small_config(&temp_dir)).unwrap();
    assert!(!first_log.exists());
    assert_eq!(engine.stats().logged_records, 0);

    for i in 20..25 {
        engine.write_at(i, "mem.used", "64.0").unwrap();
    }
    assert!(engine.flush().unwrap());

    let meta = engine.segment(0).unwrap();
    assert_eq!(meta.header.total_records, 25);
    let timestamps: Vec<_> = SegmentReader::open(&meta.path)
        .unwrap()
        .read_all()
        .unwrap()
        .into_iter()
        .map(|r| r.timestamp)
        .collect();
    assert_eq!(timestamps, (0..25).collect::<Vec<_>>());
}

#[test]
fn test_compaction_failure_does_not_fail_write() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(small_config(&temp_dir)).unwrap();

    // L1 holds 80 records, L0 holds 20
    for i in 0..100 {
        engine.write_at(i, "cpu", "0.5").unwrap();
    }
    let level1 = engine.segment(1).unwrap();
    assert_eq!(level1.header.total_records, 80);

    // cut the tail of L1 so merging into it fails
    let file = std::fs::OpenOptions::new().write(true).open(&level1.path).unwrap();
    file.set_len(level1.file_size - 4).unwrap();
    drop(file);

    // the flush at 160 grows L0 past 1KB and the merge into L1 fails
    for i in 100..160 {
        engine.write_at(i, "cpu", "0.5").unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.compaction_failures, 1);
    assert_eq!(stats.flush_failures, 0);
    assert_eq!(stats.logged_records, 0);

    let manifest = engine.manifest();
    assert!(manifest.level_exists(0));
    assert!(manifest.level_exists(1));
    assert!(!manifest.is_compacting());
    assert_eq!(engine.segment(0).unwrap().header.total_records, 80);
    assert_eq!(engine.segment(1).unwrap().id, level1.id);
}
