//! End-to-end behaviour of the public engine operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use readthrough::{BatchError, CacheConfig, QueryEngine};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct User {
    id: u32,
    name: String,
}

fn user_fetch(
    calls: Arc<AtomicUsize>,
    name: &'static str,
) -> impl FnOnce() -> std::future::Ready<Result<User, String>> {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(User {
            id: 1,
            name: name.to_string(),
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn reads_within_ttl_fetch_once() {
    let engine = QueryEngine::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_millis(5_000);

    let first = engine
        .cached_query("user:1", user_fetch(Arc::clone(&calls), "Ada"), ttl)
        .await
        .expect("first read");
    tokio::time::advance(Duration::from_millis(10)).await;
    let second = engine
        .cached_query("user:1", user_fetch(Arc::clone(&calls), "Grace"), ttl)
        .await
        .expect("second read");

    assert_eq!(first, second);
    assert_eq!(second.name, "Ada");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn reads_past_ttl_fetch_again() {
    let engine = QueryEngine::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_millis(100);

    engine
        .cached_query("user:1", user_fetch(Arc::clone(&calls), "Ada"), ttl)
        .await
        .expect("first read");
    tokio::time::advance(Duration::from_millis(150)).await;
    let refreshed = engine
        .cached_query("user:1", user_fetch(Arc::clone(&calls), "Grace"), ttl)
        .await
        .expect("refreshed read");

    assert_eq!(refreshed.name, "Grace");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn batch_registrations_share_one_flush() {
    let engine = QueryEngine::default();
    let started = Arc::new(AtomicUsize::new(0));

    let fetch = |value: &'static str| {
        let started = Arc::clone(&started);
        move || async move {
            started.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(value)
        }
    };

    let a = engine.batch_query("g", "a", fetch("A"));
    let b = engine.batch_query("g", "b", fetch("B"));
    assert_eq!(engine.pending_batch_requests(), 2);
    assert!(engine.batch_timer_armed());
    assert_eq!(started.load(Ordering::SeqCst), 0);

    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.expect("a resolves"), "A");
    assert_eq!(b.expect("b resolves"), "B");
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert!(!engine.batch_timer_armed());
}

#[tokio::test(start_paused = true)]
async fn batch_failure_is_isolated() {
    let engine = QueryEngine::default();

    let a = engine.batch_query("g", "a", || async { Ok::<_, String>("A") });
    let b = engine.batch_query("g", "b", || async { Err::<&str, _>("boom".to_string()) });
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.expect("a resolves"), "A");
    match b {
        Err(BatchError::Fetch(message)) => assert_eq!(message, "boom"),
        other => panic!("expected fetch error, got {other:?}"),
    }
}

#[tokio::test]
async fn clear_by_pattern_keeps_other_keys() {
    let engine = QueryEngine::default();
    let ttl = Duration::from_secs(60);
    for key in ["user:1", "user:2", "project:1"] {
        engine
            .cached_query(key, move || async move { Ok::<_, String>(key.to_string()) }, ttl)
            .await
            .expect("seed read");
    }

    assert_eq!(engine.clear_cache(Some("user")), 2);
    assert_eq!(engine.cache_stats().size, 1);
    assert!(!engine.invalidate("user:1"));
    assert!(engine.invalidate("project:1"));

    engine
        .cached_query("user:9", || async { Ok::<_, String>(9_u8) }, ttl)
        .await
        .expect("seed read");
    assert_eq!(engine.clear_cache(None), 1);
    assert_eq!(engine.cache_stats().size, 0);
}

#[tokio::test(start_paused = true)]
async fn stats_count_expired_entries_until_evicted() {
    let engine = QueryEngine::default();
    let ttl = Duration::from_millis(100);
    engine
        .cached_query("user:1", || async { Ok::<_, String>("Ada") }, ttl)
        .await
        .expect("seed read");
    engine
        .cached_query("user:2", || async { Ok::<_, String>("Grace") }, Duration::from_secs(60))
        .await
        .expect("seed read");

    tokio::time::advance(Duration::from_millis(200)).await;
    let stats = engine.cache_stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.expired_entries, 1);
    // "user:1" + "\"Ada\"" and "user:2" + "\"Grace\""
    assert_eq!(stats.memory_usage, 6 + 5 + 6 + 7);

    assert_eq!(engine.purge_expired(), 1);
    assert_eq!(engine.cache_stats().size, 1);
}

#[tokio::test(start_paused = true)]
async fn single_flight_is_opt_in() {
    let calls = Arc::new(AtomicUsize::new(0));
    let slow = |calls: &Arc<AtomicUsize>| {
        let calls = Arc::clone(calls);
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(1_u8)
        }
    };
    let ttl = Duration::from_secs(60);

    let engine = QueryEngine::new(CacheConfig::default().with_single_flight(true));
    let _ = tokio::join!(
        engine.cached_query("k", slow(&calls), ttl),
        engine.cached_query("k", slow(&calls), ttl),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    calls.store(0, Ordering::SeqCst);
    let engine = QueryEngine::default();
    let _ = tokio::join!(
        engine.cached_query("k", slow(&calls), ttl),
        engine.cached_query("k", slow(&calls), ttl),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn batch_query_outside_runtime_fails_fast() {
    let engine = QueryEngine::default();
    let handle = engine.batch_query("g", "a", || async { Ok::<u8, String>(1) });

    assert_eq!(engine.pending_batch_requests(), 0);
    assert!(matches!(
        futures::executor::block_on(handle),
        Err(BatchError::NoRuntime)
    ));
}
