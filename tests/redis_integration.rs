//! Behaviour against a live Redis server.
//!
//! Run with `TATLIMIT_REDIS_URL=redis://127.0.0.1:6379/0 cargo test -- --ignored`.

use std::time::Duration;

use tatlimit::config::{LimiterConfig, StoreConfig, StoreKind};
use tatlimit::ratelimit::{BlockingRateLimiter, Limit, RateLimiter};

fn redis_url() -> Option<String> {
    std::env::var("TATLIMIT_REDIS_URL").ok()
}

fn configs(url: String, prefix: &str) -> (StoreConfig, LimiterConfig) {
    let store = StoreConfig {
        kind: StoreKind::Redis,
        redis_url: url,
    };
    let limiter = LimiterConfig {
        key_prefix: prefix.to_string(),
        timeout_ms: Some(2_000),
    };
    (store, limiter)
}

async fn limiter(prefix: &str) -> Option<RateLimiter> {
    let url = redis_url()?;
    let (store, limiter) = configs(url, prefix);
    Some(RateLimiter::from_config(&store, &limiter).await.unwrap())
}

#[tokio::test]
#[ignore]
async fn redis_allow_n_and_at_most() {
    let Some(limiter) = limiter("it_rate:").await else {
        return;
    };
    let limit = Limit::new(10, 10, Duration::from_secs(60));
    limiter.reset("allow_n").await.unwrap();
    limiter.reset("at_most").await.unwrap();

    let first = limiter.allow_n("allow_n", &limit, 8).await.unwrap();
    assert_eq!((first.allowed, first.remaining), (8, 2));
    assert_eq!(first.retry_after, -1.0);
    let second = limiter.allow_n("allow_n", &limit, 5).await.unwrap();
    assert_eq!((second.allowed, second.remaining), (0, 0));
    assert!(second.retry_after > 0.0);

    let first = limiter.allow_at_most("at_most", &limit, 8).await.unwrap();
    assert_eq!((first.allowed, first.remaining), (8, 2));
    let second = limiter.allow_at_most("at_most", &limit, 5).await.unwrap();
    assert_eq!((second.allowed, second.remaining), (2, 0));
    assert_eq!(second.retry_after, -1.0);

    assert!(limiter.reset("allow_n").await.unwrap());
    assert!(!limiter.reset("allow_n").await.unwrap());
    assert!(limiter.reset("at_most").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn redis_concurrent_callers_never_exceed_burst() {
    let Some(limiter) = limiter("it_rate:").await else {
        return;
    };
    let limit = Limit::new(10, 10, Duration::from_secs(60));
    limiter.reset("contended").await.unwrap();

    let calls = (0..40).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.allow("contended", &limit).await.unwrap() })
    });
    let granted = futures::future::join_all(calls)
        .await
        .into_iter()
        .filter(|d| d.as_ref().unwrap().is_allowed())
        .count();
    assert_eq!(granted, 10);

    limiter.reset("contended").await.unwrap();
}

#[test]
#[ignore]
fn redis_blocking_limiter() {
    let Some(url) = redis_url() else {
        return;
    };
    let (store, limiter) = configs(url, "it_blocking_rate:");
    let limiter = BlockingRateLimiter::connect(&store, &limiter).unwrap();
    let limit = Limit::new(1, 1, Duration::from_secs(60));
    limiter.reset("single").unwrap();

    assert_eq!(limiter.allow("single", &limit).unwrap().allowed, 1);
    let denied = limiter.allow("single", &limit).unwrap();
    assert_eq!(denied.allowed, 0);
    assert!(denied.retry_after > 0.0);

    assert!(limiter.reset("single").unwrap());
}
