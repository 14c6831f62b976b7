use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stockroom::offload::OffloadConfig;
use stockroom::{
    CacheError, CacheKey, CacheOptions, CacheStatus, CacheStrategy, DeleteStatus, RequestCache,
    StrategyError,
};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    handle: String,
    price: u32,
}

fn shirt() -> Product {
    Product {
        handle: "shirt".to_string(),
        price: 20,
    }
}

/// Producer that counts its runs.
fn counted<T: Send + 'static>(
    calls: &Arc<AtomicUsize>,
    value: T,
) -> impl FnOnce() -> std::future::Ready<Result<T, String>> + Send + 'static {
    let calls = calls.clone();
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(value))
    }
}

/// Strategy whose entries are stale as soon as they are written.
fn immediately_stale() -> CacheStrategy {
    CacheStrategy::custom(CacheOptions {
        max_age: Some(0),
        stale_while_revalidate: Some(60),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn fresh_entry_is_returned_without_running_the_producer() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache
        .get_or_set("product:shirt", CacheStrategy::LONG, counted(&calls, shirt()))
        .await
        .unwrap();
    let second = cache
        .get_or_set(
            "product:shirt",
            CacheStrategy::LONG,
            counted(&calls, Product {
                handle: "other".to_string(),
                price: 1,
            }),
        )
        .await
        .unwrap();

    assert_eq!(first, shirt());
    assert_eq!(second, shirt());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_producer_run() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_set("menu:main", CacheStrategy::SHORT, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(vec!["Home".to_string(), "Catalog".to_string()])
                    })
                    .await
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.unwrap().unwrap(), vec!["Home", "Catalog"]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.flights_in_progress(), 0);
}

#[tokio::test]
async fn failure_reaches_every_waiter_and_is_not_cached() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<u32, _>("upstream unavailable".to_string())
        }
    };

    let (a, b) = tokio::join!(
        cache.get_or_set("cart", CacheStrategy::SHORT, failing(calls.clone())),
        cache.get_or_set("cart", CacheStrategy::SHORT, failing(calls.clone())),
    );
    assert_eq!(a.unwrap_err().into_producer().as_deref(), Some("upstream unavailable"));
    assert_eq!(b.unwrap_err().into_producer().as_deref(), Some("upstream unavailable"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.backend().is_empty());

    let retried = cache
        .get_or_set("cart", CacheStrategy::SHORT, counted(&calls, 5u32))
        .await
        .unwrap();
    assert_eq!(retried, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stale_entries_are_refetched() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    for expected in [1u32, 2, 3] {
        let value = cache
            .get_or_set("collection:new", immediately_stale(), counted(&calls, expected))
            .await
            .unwrap();
        assert_eq!(value, expected);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn entry_is_refetched_once_max_age_elapses() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let strategy = CacheStrategy::short_with(CacheOptions {
        max_age: Some(1),
        ..Default::default()
    })
    .unwrap();

    cache
        .get_or_set("blog", &strategy, counted(&calls, "v1".to_string()))
        .await
        .unwrap();
    cache
        .get_or_set("blog", &strategy, counted(&calls, "v2".to_string()))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let value = cache
        .get_or_set("blog", &strategy, counted(&calls, "v3".to_string()))
        .await
        .unwrap();
    assert_eq!(value, "v3");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn no_store_never_persists() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        cache
            .get_or_set("customer", CacheStrategy::NONE, counted(&calls, "ada".to_string()))
            .await
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.backend().is_empty());
}

#[tokio::test]
async fn no_store_still_deduplicates_concurrent_calls() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let slow = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(42u64)
        }
    };

    let (a, b) = tokio::join!(
        cache.get_or_set("session", CacheStrategy::NONE, slow(calls.clone())),
        cache.get_or_set("session", CacheStrategy::NONE, slow(calls.clone())),
    );
    assert_eq!(a.unwrap(), 42);
    assert_eq!(b.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.backend().is_empty());
}

#[tokio::test]
async fn with_cache_serves_stale_and_refreshes_in_background() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache
        .with_cache("product:hat", immediately_stale(), counted(&calls, 1u32))
        .await
        .unwrap();
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(first.value, 1);

    let second = cache
        .with_cache("product:hat", immediately_stale(), counted(&calls, 2u32))
        .await
        .unwrap();
    assert_eq!(second.status, CacheStatus::Stale);
    assert_eq!(second.value, 1);

    assert!(cache.offload().wait_all_timeout(Duration::from_secs(1)).await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let third = cache
        .with_cache("product:hat", immediately_stale(), counted(&calls, 3u32))
        .await
        .unwrap();
    assert_eq!(third.status, CacheStatus::Stale);
    assert_eq!(third.value, 2);
    cache.offload().wait_all().await;
}

#[tokio::test]
async fn refresh_cut_off_by_timeout_is_abandoned() {
    let cache = RequestCache::builder()
        .offload(
            OffloadConfig::builder()
                .timeout(Duration::from_millis(50))
                .build(),
        )
        .build();
    let key = CacheKey::from("product:scarf");

    cache
        .get_or_set(key.clone(), immediately_stale(), || async { Ok::<_, String>(1u32) })
        .await
        .unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let flag = finished.clone();
    let stale = cache
        .with_cache(key.clone(), immediately_stale(), move || async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(2u32)
        })
        .await
        .unwrap();
    assert_eq!(stale.status, CacheStatus::Stale);
    assert_eq!(stale.value, 1);

    assert!(cache.offload().wait_all_timeout(Duration::from_secs(1)).await);
    assert!(!cache.is_in_flight(&key));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    let still_stale = cache
        .with_cache(key, immediately_stale(), || async { Ok::<_, String>(3u32) })
        .await
        .unwrap();
    assert_eq!(still_stale.value, 1);
    cache.offload().wait_all().await;
}

#[tokio::test]
async fn foreground_request_keeps_a_timed_out_refresh_alive() {
    let cache = RequestCache::builder()
        .offload(
            OffloadConfig::builder()
                .timeout(Duration::from_millis(50))
                .build(),
        )
        .build();
    let key = CacheKey::from("product:belt");

    cache
        .get_or_set(key.clone(), immediately_stale(), || async { Ok::<_, String>(1u32) })
        .await
        .unwrap();

    let stale = cache
        .with_cache(key.clone(), immediately_stale(), || async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok::<_, String>(2u32)
        })
        .await
        .unwrap();
    assert_eq!(stale.status, CacheStatus::Stale);

    while !cache.is_in_flight(&key) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    // Stale entries are a miss for get_or_set, so this joins the refresh.
    let fresh = cache
        .get_or_set(key, immediately_stale(), || async { Ok::<_, String>(9u32) })
        .await
        .unwrap();
    assert_eq!(fresh, 2);
    cache.offload().wait_all().await;
}

#[tokio::test]
async fn with_cache_reports_hits() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .with_cache("shop", CacheStrategy::LONG, counted(&calls, "Outfitters".to_string()))
        .await
        .unwrap();
    let hit = cache
        .with_cache("shop", CacheStrategy::LONG, counted(&calls, "ignored".to_string()))
        .await
        .unwrap();

    assert_eq!(hit.status, CacheStatus::Hit);
    assert_eq!(hit.into_inner(), "Outfitters");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_revalidation_keeps_the_stale_entry() {
    let cache = RequestCache::new();

    cache
        .with_cache("price", immediately_stale(), || async { Ok::<_, String>(10u32) })
        .await
        .unwrap();

    let stale = cache
        .with_cache("price", immediately_stale(), || async {
            Err::<u32, _>("timeout".to_string())
        })
        .await
        .unwrap();
    assert_eq!(stale.status, CacheStatus::Stale);
    cache.offload().wait_all().await;

    let still_stale = cache
        .with_cache("price", immediately_stale(), || async {
            Err::<u32, _>("timeout".to_string())
        })
        .await
        .unwrap();
    assert_eq!(still_stale.value, 10);
    cache.offload().wait_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_caller_does_not_cancel_the_producer() {
    let cache = RequestCache::new();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let leader = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_set("recommendations", CacheStrategy::LONG, move || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, String>("fresh".to_string())
                })
                .await
        })
    };

    started_rx.await.unwrap();
    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());
    assert!(cache.is_in_flight(&CacheKey::from("recommendations")));

    release_tx.send(()).unwrap();
    while cache.flights_in_progress() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let value = cache
        .get_or_set(
            "recommendations",
            CacheStrategy::LONG,
            counted(&calls, "late".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

fn explode() -> Result<u32, String> {
    panic!("producer exploded")
}

#[tokio::test]
async fn panicking_producer_is_reported_as_aborted() {
    let cache = RequestCache::new();

    let err = cache
        .get_or_set("boom", CacheStrategy::SHORT, || async { explode() })
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Aborted(_)));
    assert_eq!(cache.flights_in_progress(), 0);

    let value = cache
        .get_or_set("boom", CacheStrategy::SHORT, || async { Ok::<_, String>(1u32) })
        .await
        .unwrap();
    assert_eq!(value, 1);
}

#[tokio::test]
async fn invalid_strategy_fails_before_the_producer_runs() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let err = cache
        .get_or_set(
            "bad",
            CacheOptions {
                max_age: Some(-1),
                ..Default::default()
            },
            counted(&calls, 0u8),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::Strategy(StrategyError::NegativeValue {
            directive: "max-age",
            value: -1
        })
    ));

    let err = cache
        .with_cache("bad", "public, max-age=soon", counted(&calls, 0u8))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::Strategy(StrategyError::NotNumeric { directive: "max-age", .. })
    ));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cache.flights_in_progress(), 0);
}

#[tokio::test]
async fn header_text_is_accepted_as_a_strategy() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        cache
            .get_or_set("policies", "public, max-age=60", counted(&calls, true))
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalidate_forces_a_refetch() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get_or_set("footer", CacheStrategy::LONG, counted(&calls, 1u8))
        .await
        .unwrap();
    assert_eq!(cache.invalidate("footer").await.unwrap(), DeleteStatus::Deleted(1));
    assert_eq!(cache.invalidate("footer").await.unwrap(), DeleteStatus::Missing);

    cache
        .get_or_set("footer", CacheStrategy::LONG, counted(&calls, 2u8))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn query_keys_with_equal_variables_share_an_entry() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = "query Product($handle: String!) { product(handle: $handle) { title } }";

    let key = || CacheKey::from_query(query, &serde_json::json!({ "handle": "shirt" }));
    cache
        .get_or_set(key(), CacheStrategy::SHORT, counted(&calls, shirt()))
        .await
        .unwrap();
    cache
        .get_or_set(key(), CacheStrategy::SHORT, counted(&calls, shirt()))
        .await
        .unwrap();

    let reordered = CacheKey::from_query(
        query,
        &serde_json::json!({ "country": "CA", "handle": "shirt" }),
    );
    let same = CacheKey::from_query(
        query,
        &serde_json::json!({ "handle": "shirt", "country": "CA" }),
    );
    for key in [reordered, same] {
        cache
            .get_or_set(key, CacheStrategy::SHORT, counted(&calls, shirt()))
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let other = CacheKey::from_query(query, &serde_json::json!({ "handle": "hat" }));
    cache
        .get_or_set(other, CacheStrategy::SHORT, counted(&calls, shirt()))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
