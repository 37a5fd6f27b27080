use crate::file::load_snapshot;
use crate::{FileConfig, FileStorage, MemStorage, Snapshot, SqliteStorage, Storage, StorageError};
use metron_common::retry::Backoff;
use metron_common::types::{Metric, MetricKind};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn setup() -> (TempDir, FileConfig) {
    let dir = TempDir::new().unwrap();
    let mut config = FileConfig::new(dir.path().join("metrics-db.json"));
    config.backoff = Backoff::none();
    (dir, config)
}

async fn open(config: FileConfig) -> FileStorage {
    FileStorage::open(config, CancellationToken::new())
        .await
        .unwrap()
}

/// One of each backend; the file store runs in sync mode under the temp dir.
async fn backends() -> (TempDir, Vec<(&'static str, Arc<dyn Storage>)>) {
    let (dir, config) = setup();
    let sqlite = SqliteStorage::open(&dir.path().join("metrics.db")).unwrap();
    let stores: Vec<(&'static str, Arc<dyn Storage>)> = vec![
        ("mem", Arc::new(MemStorage::new())),
        ("file", Arc::new(open(config).await)),
        ("sqlite", Arc::new(sqlite)),
    ];
    (dir, stores)
}

#[tokio::test]
async fn counters_accumulate_in_any_order() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        for delta in [5, -2, 10] {
            store.add_counter("PollCount", delta).await.unwrap();
        }
        assert_eq!(store.get_counter("PollCount").await.unwrap(), 13, "{name}");
    }

    let a = MemStorage::new();
    let b = MemStorage::new();
    for delta in [1, 2, 3] {
        a.add_counter("c", delta).await.unwrap();
    }
    for delta in [3, 1, 2] {
        b.add_counter("c", delta).await.unwrap();
    }
    assert_eq!(a.snapshot().await, b.snapshot().await);
}

#[tokio::test]
async fn counters_wrap_on_overflow() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        store.add_counter("c", i64::MAX).await.unwrap();
        store.add_counter("c", 1).await.unwrap();
        assert_eq!(store.get_counter("c").await.unwrap(), i64::MIN, "{name}");

        store
            .save_batch(&[Metric::counter("c", -1), Metric::counter("c", -1)])
            .await
            .unwrap();
        assert_eq!(store.get_counter("c").await.unwrap(), i64::MAX - 1, "{name}");
    }
}

#[tokio::test]
async fn gauge_keeps_last_value() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        store.set_gauge("Alloc", 1.5).await.unwrap();
        store.set_gauge("Alloc", 0.25).await.unwrap();
        assert_eq!(store.get_gauge("Alloc").await.unwrap(), 0.25, "{name}");
    }
}

#[tokio::test]
async fn missing_metric_is_not_found() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        let err = store.get_gauge("nope").await.unwrap_err();
        assert!(err.is_not_found(), "{name}");
        assert!(matches!(
            store.get_counter("nope").await.unwrap_err(),
            StorageError::NotFound {
                kind: MetricKind::Counter,
                ..
            }
        ));
    }
}

#[tokio::test]
async fn gauge_and_counter_namespaces_are_separate() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        store.set_gauge("x", 2.0).await.unwrap();
        assert!(store.get_counter("x").await.unwrap_err().is_not_found(), "{name}");
    }
}

#[tokio::test]
async fn invalid_batch_leaves_storage_untouched() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        store.add_counter("c", 1).await.unwrap();
        let mut bad = Metric::gauge("g", 1.0);
        bad.value = None;
        let batch = vec![Metric::counter("c", 100), bad];

        let err = store.save_batch(&batch).await.unwrap_err();
        assert!(err.is_invalid_argument(), "{name}");
        assert_eq!(store.get_counter("c").await.unwrap(), 1, "{name}");
        assert!(store.get_gauge("g").await.unwrap_err().is_not_found());
    }
}

#[tokio::test]
async fn non_finite_gauge_is_rejected() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        let err = store.set_gauge("g", f64::NAN).await.unwrap_err();
        assert!(err.is_invalid_argument(), "{name}");
    }
}

#[tokio::test]
async fn get_all_renders_both_tables() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        store
            .save_batch(&[
                Metric::gauge("Alloc", 1.0),
                Metric::gauge("RandomValue", 0.5),
                Metric::counter("PollCount", 3),
                Metric::counter("PollCount", 2),
            ])
            .await
            .unwrap();

        let all = store.get_all().await.unwrap();
        let rendered: Vec<_> = all.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(
            rendered,
            vec![("Alloc", "1"), ("PollCount", "5"), ("RandomValue", "0.5")],
            "{name}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_counter_writers_commute() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let store = store.clone();
                tokio::spawn(async move {
                    for delta in 1..=25 {
                        let delta = if w % 2 == 0 { delta } else { -delta * 2 };
                        store.add_counter("c", delta).await.unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }
        // 4 writers add 325 each, 4 subtract 650 each.
        assert_eq!(store.get_counter("c").await.unwrap(), -1300, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_half_a_batch() {
    let (_dir, stores) = backends().await;
    for (name, store) in stores {
        let batch: Vec<Metric> = (0..50).map(|i| Metric::counter(format!("c{i}"), 1)).collect();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    store.save_batch(&batch).await.unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let all = store.get_all().await.unwrap();
                        let mut values: Vec<&String> = all.values().collect();
                        values.dedup();
                        assert!(values.len() <= 1, "torn batch: {all:?}");
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(store.get_counter("c49").await.unwrap(), 20, "{name}");
    }
}

#[tokio::test]
async fn sync_mode_writes_before_returning() {
    let (_dir, config) = setup();
    let path = config.path.clone();
    let store = open(config).await;
    assert!(store.is_sync());

    store.set_gauge("x", 1.0).await.unwrap();

    let on_disk = load_snapshot(&path).await.unwrap().unwrap();
    assert_eq!(on_disk.gauge.get("x"), Some(&1.0));
    assert!(on_disk.counter.is_empty());
}

#[tokio::test]
async fn snapshot_file_layout() {
    let (_dir, config) = setup();
    let path = config.path.clone();
    let store = open(config).await;
    store
        .save_batch(&[Metric::gauge("Alloc", 2.5), Metric::counter("PollCount", 4)])
        .await
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(
        raw,
        serde_json::json!({"gauge": {"Alloc": 2.5}, "counter": {"PollCount": 4}})
    );
}

#[tokio::test]
async fn restores_previous_snapshot() {
    let (_dir, config) = setup();
    {
        let store = open(config.clone()).await;
        store.add_counter("PollCount", 7).await.unwrap();
        store.set_gauge("Alloc", 3.0).await.unwrap();
        store.close().await.unwrap();
    }

    let store = open(config).await;
    assert_eq!(store.get_counter("PollCount").await.unwrap(), 7);
    assert_eq!(store.get_gauge("Alloc").await.unwrap(), 3.0);
}

#[tokio::test]
async fn restore_disabled_ignores_file() {
    let (_dir, mut config) = setup();
    std::fs::write(&config.path, r#"{"gauge":{"x":1.0},"counter":{}}"#).unwrap();
    config.restore = false;

    let store = open(config).await;
    assert!(store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn cold_start_without_file() {
    let (_dir, config) = setup();
    assert!(!config.path.exists());

    let store = open(config).await;
    assert!(store.get_all().await.unwrap().is_empty());
    store.add_counter("c", 1).await.unwrap();
    assert_eq!(store.get_counter("c").await.unwrap(), 1);
}

#[tokio::test]
async fn empty_or_truncated_file_starts_empty() {
    for contents in ["", "  \n", r#"{"gauge":{"x":1"#] {
        let (_dir, config) = setup();
        std::fs::write(&config.path, contents).unwrap();

        let store = open(config).await;
        assert!(store.get_all().await.unwrap().is_empty(), "{contents:?}");
    }
}

#[tokio::test]
async fn malformed_file_fails_open() {
    let (_dir, config) = setup();
    std::fs::write(&config.path, r#"{"gauge": "not a table"}"#).unwrap();

    let err = FileStorage::open(config, CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StorageError::Consistency { .. }));
}

#[tokio::test]
async fn interval_mode_defers_writes_until_tick() {
    let (_dir, mut config) = setup();
    config.store_interval = Duration::from_millis(50);
    let path = config.path.clone();
    let store = open(config).await;
    assert!(!store.is_sync());

    store.set_gauge("x", 1.0).await.unwrap();
    assert!(!path.exists());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let on_disk = load_snapshot(&path).await.unwrap().unwrap();
    assert_eq!(on_disk.gauge.get("x"), Some(&1.0));

    store.close().await.unwrap();
}

#[tokio::test]
async fn close_writes_final_snapshot() {
    let (_dir, mut config) = setup();
    config.store_interval = Duration::from_secs(3600);
    let path = config.path.clone();
    let store = open(config).await;

    store.add_counter("PollCount", 2).await.unwrap();
    assert!(!path.exists());

    store.close().await.unwrap();
    let on_disk = load_snapshot(&path).await.unwrap().unwrap();
    assert_eq!(on_disk.counter.get("PollCount"), Some(&2));
}

#[tokio::test]
async fn unwritable_path_surfaces_io_error() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "file, not a directory").unwrap();

    let mut config = FileConfig::new(blocker.join("metrics-db.json"));
    config.restore = false;
    config.backoff = Backoff::new(vec![Duration::from_millis(1)]);
    let store = open(config).await;

    let err = store.set_gauge("x", 1.0).await.unwrap_err();
    assert!(matches!(err, StorageError::Io { .. }));
}

#[tokio::test]
async fn cancelled_retry_is_reported() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();

    let cancel = CancellationToken::new();
    let mut config = FileConfig::new(blocker.join("metrics-db.json"));
    config.restore = false;
    config.backoff = Backoff::new(vec![Duration::from_secs(60)]);
    let store = FileStorage::open(config, cancel.clone()).await.unwrap();

    cancel.cancel();
    let err = store.set_gauge("x", 1.0).await.unwrap_err();
    assert!(matches!(err, StorageError::Cancelled { .. }));
}

#[tokio::test]
async fn failing_periodic_write_does_not_block_writers() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();

    let mut config = FileConfig::new(blocker.join("metrics-db.json"));
    config.restore = false;
    config.store_interval = Duration::from_millis(50);
    config.backoff = Backoff::new(vec![Duration::from_millis(800)]);
    let store = open(config).await;

    // Let the saver hit the unwritable path and start its backoff.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = std::time::Instant::now();
    store.set_gauge("x", 1.0).await.unwrap();
    store.add_counter("c", 1).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "writer waited {:?}",
        started.elapsed()
    );
    assert_eq!(store.get_gauge("x").await.unwrap(), 1.0);
}

#[tokio::test]
async fn mem_replace_and_snapshot() {
    let store = MemStorage::new();
    let mut snapshot = Snapshot::default();
    snapshot.gauge.insert("g".into(), 4.0);
    store.replace(snapshot.clone()).await;
    assert_eq!(store.snapshot().await, snapshot);
    assert!(!snapshot.is_empty());
}

#[tokio::test]
async fn sqlite_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db").join("metrics.db");
    {
        let store = SqliteStorage::open(&path).unwrap();
        store
            .save_batch(&[Metric::counter("c", 2), Metric::gauge("g", 1.5)])
            .await
            .unwrap();
        store.ping().await.unwrap();
        store.close().await.unwrap();
    }

    let store = SqliteStorage::open(&path).unwrap();
    store.add_counter("c", 3).await.unwrap();
    assert_eq!(store.get_counter("c").await.unwrap(), 5);
    assert_eq!(store.get_gauge("g").await.unwrap(), 1.5);
}
