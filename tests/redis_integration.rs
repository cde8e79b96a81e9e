//! Runs the channel against a live KeyDB/Redis server.
//!
//! Set `REDCHAN_TEST_REDIS` (e.g. `redis://127.0.0.1:6379`) to enable; the
//! tests log a skip note and return early otherwise.

use std::sync::Arc;
use std::time::{Duration, Instant};

use redchan::{Channel, ChannelConfig, ChannelError, Config, ConnectConfig, LockFencing, StoreTarget};
use tokio_util::sync::CancellationToken;

fn endpoint() -> Option<String> {
    std::env::var("REDCHAN_TEST_REDIS").ok()
}

/// `false` (and a note on stderr) when no live server is configured.
fn live_server(test: &str) -> bool {
    let enabled = endpoint().is_some();
    if !enabled {
        eprintln!("skipping {test}: REDCHAN_TEST_REDIS not set");
    }
    enabled
}

async fn connect(name: &str, channel: ChannelConfig) -> Channel {
    let endpoint = endpoint().expect("checked by caller");
    let suffix = uuid::Uuid::new_v4();
    let config = Config {
        channel: channel
            .with_channel_key(format!("redchan:test:{name}:{suffix}:list"))
            .with_lock_key(format!("redchan:test:{name}:{suffix}:lock")),
        store: StoreTarget::single(endpoint),
        connect: ConnectConfig {
            retry_interval_secs: 1,
            max_attempts: Some(3),
        },
    };
    Channel::connect(&config, &CancellationToken::new())
        .await
        .expect("test store reachable")
}

#[tokio::test]
async fn test_fifo_and_capacity_against_redis() {
    if !live_server("test_fifo_and_capacity_against_redis") {
        return;
    }
    let chan = connect("fifo", ChannelConfig::default().with_max_len(2)).await;

    assert_eq!(chan.push_raw("v1").await.unwrap(), 1);
    assert_eq!(chan.push_raw("v2").await.unwrap(), 2);
    assert!(matches!(
        chan.push_raw("v3").await,
        Err(ChannelError::Full { len: 2, max_len: 2 })
    ));

    assert_eq!(chan.pop_raw().await.unwrap().as_deref(), Some("v1"));
    assert_eq!(chan.pop_raw().await.unwrap().as_deref(), Some("v2"));

    let start = Instant::now();
    assert_eq!(chan.pop_raw().await.unwrap(), None);
    assert!(start.elapsed() >= Duration::from_millis(100));

    chan.push_raw("v4").await.unwrap();
    assert_eq!(chan.clear().await.unwrap(), 1);
    assert_eq!(chan.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_token_fencing_against_redis() {
    if !live_server("test_token_fencing_against_redis") {
        return;
    }
    let chan = connect(
        "fenced",
        ChannelConfig::default().with_lock_fencing(LockFencing::Token),
    )
    .await;

    chan.push(&serde_json::json!({"id": 1})).await.unwrap();
    let value: Option<serde_json::Value> = chan.pop().await.unwrap();
    assert_eq!(value, Some(serde_json::json!({"id": 1})));
    chan.clear().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_producers_against_redis() {
    if !live_server("test_concurrent_producers_against_redis") {
        return;
    }
    let chan = connect(
        "concurrent",
        ChannelConfig::default()
            .with_max_len(10)
            .with_lock_retry_interval(Duration::from_millis(5)),
    )
    .await;
    let accepted = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let handles: Vec<_> = (0..6)
        .map(|producer| {
            let chan = chan.clone();
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                for attempt in 0..5 {
                    if chan.push_raw(format!("{producer}-{attempt}")).await.is_ok() {
                        accepted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 10);
    assert_eq!(chan.len().await.unwrap(), 10);
    chan.clear().await.unwrap();
}
