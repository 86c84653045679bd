use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cachedisk_core::{CacheConfig, CacheDisk, CallArgs, WrapConfig};

fn manager(dir: &Path) -> CacheDisk {
    CacheDisk::new(CacheConfig::default().with_directory(dir))
}

#[tokio::test]
async fn async_results_are_cached() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let triple = cache
        .wrap_async("async_triple", WrapConfig::default(), move |x: i64| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(x * 3)
            }
        })
        .unwrap();

    for (input, expected) in [(1, 3), (3, 9), (-2, -6), (0, 0)] {
        assert_eq!(triple.call(input).await.unwrap(), expected);
        assert_eq!(triple.call(input).await.unwrap(), expected);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_key_calls_all_return_the_value() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let slow = Arc::new(
        cache
            .wrap_async("slow_triple", WrapConfig::default(), move |x: u64| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, Infallible>(x * 3)
                }
            })
            .unwrap(),
    );

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let slow = slow.clone();
            tokio::spawn(async move { slow.call(7).await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 21);
    }

    let computed = calls.load(Ordering::SeqCst);
    assert!((1..=10).contains(&computed), "computed {computed} times");
    assert_eq!(slow.cache().len(), 1);

    assert_eq!(slow.call(7).await.unwrap(), 21);
    assert_eq!(calls.load(Ordering::SeqCst), computed);
}

#[tokio::test]
async fn async_errors_are_not_cached() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());

    let faulty = cache
        .wrap_async("async_faulty", WrapConfig::default(), |x: i32| async move {
            if x == 0 { Err(format!("cannot handle {x}")) } else { Ok(x) }
        })
        .unwrap();

    assert!(faulty.call(0).await.is_err());
    assert_eq!(faulty.call(3).await, Ok(3));
    assert!(faulty.cache().contains(&3i32));
    assert!(!faulty.cache().contains(&0i32));
}

#[tokio::test]
async fn async_keyword_order_is_irrelevant() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let sum = cache
        .wrap_async("async_kwargs", WrapConfig::default(), move |args: CallArgs| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                let x: i64 = args.arg_as(0).unwrap_or(0);
                let y: i64 = args.kwarg_as("y").unwrap_or(10);
                let z: i64 = args.kwarg_as("z").unwrap_or(0);
                Ok::<_, Infallible>(x + y + z)
            }
        })
        .unwrap();

    assert_eq!(sum.call(CallArgs::new().arg(1)).await.unwrap(), 11);
    assert_eq!(sum.call(CallArgs::new().arg(1).kwarg("y", 20).kwarg("z", 5)).await.unwrap(), 26);
    assert_eq!(sum.call(CallArgs::new().arg(1).kwarg("z", 5).kwarg("y", 20)).await.unwrap(), 26);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sync_and_async_wrappers_share_one_manager() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    let lazy = WrapConfig::default().with_growth_factor(1000.0);

    let blocking = cache.wrap_sync("blocking", lazy, |x: u8| Ok::<_, Infallible>(x)).unwrap();
    let awaited = cache
        .wrap_async("awaited", lazy, |x: u8| async move { Ok::<_, Infallible>(x) })
        .unwrap();

    for x in 0..3 {
        blocking.call(x).unwrap();
        awaited.call(x).await.unwrap();
    }
    assert_eq!(cache.dirty_functions(), vec!["awaited".to_string(), "blocking".to_string()]);

    let report = cache.commit_all();
    assert_eq!(report.saved.len(), 2);
    assert_eq!(cache.store().load::<u8>("awaited").len(), 3);
}

#[tokio::test]
async fn panic_in_async_function_commits_dirty_tables() {
    let temp = tempfile::tempdir().unwrap();
    let cache = manager(temp.path());
    let lazy = WrapConfig::default().with_growth_factor(1000.0);

    let checked = Arc::new(
        cache
            .wrap_async("async_checked", lazy, |x: i32| async move {
                tokio::task::yield_now().await;
                if x < 0 {
                    panic!("negative input");
                }
                Ok::<_, Infallible>(x)
            })
            .unwrap(),
    );

    checked.call(1).await.unwrap();
    checked.call(2).await.unwrap();
    assert!(cache.is_dirty("async_checked"));

    let task = {
        let checked = checked.clone();
        tokio::spawn(async move { checked.call(-1).await })
    };
    let err = task.await.unwrap_err();
    assert!(err.is_panic());

    assert!(!cache.is_dirty("async_checked"));
    assert_eq!(cache.store().load::<i32>("async_checked").len(), 2);
}
