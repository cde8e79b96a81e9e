//! Bounded FIFO channel shared between processes through a KeyDB/Redis list.
//!
//! Producers and consumers in any number of processes push and pop through
//! one named list key.  A second key, set with `SET NX EX`, acts as a
//! distributed mutex so that a push's length check and insert are never
//! interleaved with another writer's.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use redchan::{Channel, ChannelConfig, Config, StoreTarget};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config {
//!     channel: ChannelConfig::default().with_max_len(1_000),
//!     store: StoreTarget::single("redis://127.0.0.1:6379"),
//!     connect: Default::default(),
//! };
//! let chan = Channel::connect(&config, &CancellationToken::new()).await?;
//! chan.push(&42u32).await?;
//! let value: Option<u32> = chan.pop().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod coordination;
pub mod error;
pub mod metrics;

pub use channel::Channel;
pub use config::{ChannelConfig, Config, ConnectConfig, LockFencing, StoreTarget};
pub use coordination::locks::{DistributedLock, LockGuard};
pub use coordination::memory::MemoryStore;
pub use coordination::redis::RedisStore;
pub use coordination::ListStore;
pub use error::{ChannelError, ChannelResult, ConnectError};
pub use metrics::MetricsRegistry;
