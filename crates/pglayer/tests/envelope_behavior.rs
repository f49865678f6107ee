//! Envelope behavior observable without a server: retry attempt counts and
//! the breaker gate, measured through the metrics sink against an
//! unreachable endpoint.

use std::sync::Arc;
use std::time::Duration;

use pglayer::{Config, CountingMetrics, Phase};

fn unreachable_config() -> Config {
    // Port 9 (discard) is closed on any sane CI host; connection attempts
    // fail fast with ECONNREFUSED, bounded by the connect timeout.
    Config::new()
        .host("127.0.0.1")
        .port(9)
        .database("nope")
        .username("nobody")
        .connect_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn retry_makes_exactly_n_attempts() {
    let metrics = Arc::new(CountingMetrics::new());
    let db = unreachable_config()
        .retry(3, Duration::from_millis(1))
        .metrics(metrics.clone())
        .connect()
        .expect("config");

    let err = db.ping().await.unwrap_err();
    assert!(err.is_connection(), "got {err}");
    assert_eq!(metrics.queries(), 3, "one observation per attempt");
    assert_eq!(metrics.errors(), 3);
}

#[tokio::test]
async fn no_retry_means_single_attempt() {
    let metrics = Arc::new(CountingMetrics::new());
    let db = unreachable_config()
        .metrics(metrics.clone())
        .connect()
        .expect("config");

    let _ = db.ping().await.unwrap_err();
    assert_eq!(metrics.queries(), 1);
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_short_circuits() {
    let metrics = Arc::new(CountingMetrics::new());
    let db = unreachable_config()
        .circuit_breaker(true)
        .circuit_failure_threshold(2)
        .circuit_open_timeout(Duration::from_secs(30))
        .metrics(metrics.clone())
        .connect()
        .expect("config");

    let _ = db.ping().await.unwrap_err();
    let _ = db.ping().await.unwrap_err();
    assert_eq!(metrics.breaker_phase(), Some(Phase::Open));

    // Third call is rejected by the gate without touching the pool, but the
    // rejection is still a call: it reports a duration and an error.
    let queries_before = metrics.queries();
    let errors_before = metrics.errors();
    let err = db.ping().await.unwrap_err();
    assert!(err.is_connection());
    assert!(err.message().starts_with("circuit open"), "got {err}");
    assert_eq!(metrics.queries(), queries_before + 1);
    assert_eq!(metrics.errors(), errors_before + 1);
}

#[tokio::test]
async fn circuit_open_errors_are_retriable_connection_errors() {
    let db = unreachable_config()
        .circuit_breaker(true)
        .circuit_failure_threshold(1)
        .circuit_open_timeout(Duration::from_secs(30))
        .retry(2, Duration::from_millis(1))
        .connect()
        .expect("config");

    // First call trips the breaker on its first attempt; the retry
    // re-enters the gate and gets the sentinel.
    let err = db.ping().await.unwrap_err();
    assert!(err.is_connection());
}
