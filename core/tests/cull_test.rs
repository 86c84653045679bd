use std::convert::Infallible;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cachedisk_core::{CacheConfig, CacheDisk, CallKey, StorageFormat, WrapConfig};

fn manager(dir: &Path) -> CacheDisk {
    CacheDisk::new(CacheConfig::default().with_directory(dir).with_format(StorageFormat::Json))
}

fn seed(cache: &CacheDisk, name: &str, keys: &[&str]) {
    let entries: Vec<(CallKey, String)> = keys
        .iter()
        .map(|key| (CallKey::from_args(key).unwrap(), key.to_uppercase()))
        .collect();
    cache.store().save(name, entries.iter().map(|(k, v)| (k, v))).unwrap();
}

#[test]
fn cull_keeps_frequently_used_entries() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    seed(&cache, "shout", &["a", "b"]);

    let shout = cache
        .wrap_sync("shout", WrapConfig::default(), |s: String| {
            Ok::<_, Infallible>(s.to_uppercase())
        })
        .unwrap();
    for _ in 0..5 {
        assert_eq!(shout.call("a".to_string()).unwrap(), "A");
    }

    let report = cache.cull(1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.persisted, vec!["shout".to_string()]);
    assert!(report.dropped.is_empty());

    assert!(shout.cache().contains("a"));
    assert!(!shout.cache().contains("b"));
    let on_disk = cache.store().load::<String>("shout");
    assert_eq!(on_disk.len(), 1);
    assert_eq!(on_disk[0].0, CallKey::from_args("a").unwrap());
}

#[test]
fn cull_narrows_usage_for_the_next_cycle() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    let echo = cache
        .wrap_sync("echo", WrapConfig::default(), |n: u32| Ok::<_, Infallible>(n))
        .unwrap();

    for _ in 0..3 {
        echo.call(1).unwrap();
    }
    echo.call(2).unwrap();

    let report = cache.cull(2);
    assert_eq!(report.removed, 1);
    assert_eq!(echo.cache().usage(&1u32), Some(3));
    assert_eq!(echo.cache().usage(&2u32), None);

    // Counts carry over, so the hot key survives a stricter pass only after more use.
    echo.call(1).unwrap();
    echo.call(1).unwrap();
    let report = cache.cull(5);
    assert!(report.dropped.is_empty());
    assert_eq!(echo.cache().len(), 1);
    let report = cache.cull(6);
    assert_eq!(report.dropped, vec!["echo".to_string()]);
}

#[test]
fn emptied_table_is_dropped_with_its_file() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    seed(&cache, "stale", &["old"]);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let stale = cache
        .wrap_sync("stale", WrapConfig::default().with_growth_factor(1000.0), move |s: String| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(s.to_uppercase())
        })
        .unwrap();
    assert_eq!(stale.cache().len(), 1);

    let report = cache.cull(1);
    assert_eq!(report.dropped, vec!["stale".to_string()]);
    assert!(!cache.store().path_for("stale").exists());
    assert!(cache.registered_functions().is_empty());
    assert!(!cache.is_dirty("stale"));
    assert_eq!(cache.stats().dropped_tables, 1);

    // The wrapper keeps working and registers itself again.
    assert_eq!(stale.call("old".to_string()).unwrap(), "OLD");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.registered_functions(), vec!["stale".to_string()]);
    assert!(cache.store().path_for("stale").exists());
}

#[test]
fn cull_clears_dirty_state_of_persisted_tables() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    let lazy = WrapConfig::default().with_growth_factor(1000.0);
    let first = cache.wrap_sync("first", lazy, |n: u8| Ok::<_, Infallible>(n)).unwrap();
    let second = cache.wrap_sync("second", lazy, |n: u8| Ok::<_, Infallible>(n)).unwrap();

    first.call(1).unwrap();
    first.call(2).unwrap();
    second.call(1).unwrap();
    assert_eq!(cache.dirty_functions(), vec!["first".to_string()]);

    let report = cache.cull(1);
    assert_eq!(report.removed, 0);
    assert_eq!(report.persisted.len(), 2);
    assert!(cache.dirty_functions().is_empty());
    assert_eq!(cache.store().load::<u8>("first").len(), 2);
}

#[test]
fn failed_save_after_cull_is_counted() {
    let temp = tempfile::tempdir().unwrap();
    let blocked = temp.path().join("storage");
    fs::write(&blocked, b"a file where the directory should be").unwrap();
    let cache = manager(&blocked);
    let echo = cache
        .wrap_sync("echo", WrapConfig::default(), |n: u32| Ok::<_, Infallible>(n))
        .unwrap();

    echo.call(1).unwrap();
    echo.call(1).unwrap();
    echo.call(2).unwrap();
    let before = cache.stats().save_failures;

    let report = cache.cull(2);
    assert_eq!(report.removed, 1);
    assert_eq!(cache.stats().save_failures, before + 1);
    assert!(cache.is_dirty("echo"));
}
