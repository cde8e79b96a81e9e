//! Store coordination layer backed by KeyDB (Redis-compatible).
//!
//! The channel and its lock only ever talk to the store through the
//! [`ListStore`] trait, which names the handful of primitives they need:
//! conditional set with expiry, delete, compare-and-delete, and the three
//! list operations.  [`redis::RedisStore`] speaks to a real server through a
//! `fred` pool; [`memory::MemoryStore`] keeps everything in process.

pub mod locks;
pub mod memory;
pub mod redis;

use std::time::Duration;

use anyhow::Result;

/// The subset of Redis semantics the channel relies on.
///
/// Implementations must be safe to share between tasks; every call is a
/// single round-trip with no client-side locking.
#[async_trait::async_trait]
pub trait ListStore: Send + Sync {
    /// `SET key value NX EX ttl`.  Returns `true` if the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// `DEL key`.  Returns the number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> Result<u64>;

    /// Delete `key` only if it currently holds `expected`, atomically.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

    /// `LLEN key`.  A missing key has length 0.
    async fn llen(&self, key: &str) -> Result<u64>;

    /// `LPUSH key value`.  Returns the list length after the push.
    async fn lpush(&self, key: &str, value: &str) -> Result<u64>;

    /// `RPOP key`.  Returns `None` when the list is empty or missing.
    async fn rpop(&self, key: &str) -> Result<Option<String>>;

    /// `PING`.
    async fn ping(&self) -> Result<()>;
}
