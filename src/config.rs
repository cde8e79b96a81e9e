use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Lock fencing
// ---------------------------------------------------------------------------

/// How the channel lock is released.
///
/// | Variant | Stored value          | Release                          |
/// |---------|-----------------------|----------------------------------|
/// | `none`  | `1`                   | unconditional `DEL`              |
/// | `token` | `<holder>:<uuid>`     | `DEL` only if the value matches  |
///
/// `none` is wire-compatible with existing deployments but a holder whose
/// lock already expired will delete whoever holds the key now.  `token`
/// closes that gap; every writer sharing the lock key should use the same
/// mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockFencing {
    #[default]
    None,
    Token,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    pub store: StoreTarget,
    #[serde(default)]
    pub connect: ConnectConfig,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Key of the list holding queued values.
    #[serde(default = "default_channel_key")]
    pub channel_key: String,
    /// Key used as the mutex guarding every mutation of `channel_key`.
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    /// Maximum list length accepted by `push`.  `0` means unbounded.
    #[serde(default)]
    pub max_len: u64,
    /// Deadline (milliseconds) applied to the store calls of one operation.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Expiry (seconds) of the lock key, so a crashed holder cannot wedge
    /// the channel forever.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Pause (milliseconds) between lock acquisition attempts.
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
    /// Pause (milliseconds) after a pop that found nothing.
    #[serde(default = "default_empty_pop_delay_ms")]
    pub empty_pop_delay_ms: u64,
    #[serde(default)]
    pub lock_fencing: LockFencing,
}

/// Longest lock expiry accepted (one day).
pub const MAX_LOCK_TTL_SECS: u64 = 86_400;

pub const DEFAULT_CHANNEL_KEY: &str = "system:redis-channel:list";
pub const DEFAULT_LOCK_KEY: &str = "system:redis-channel:lock";

fn default_channel_key() -> String {
    DEFAULT_CHANNEL_KEY.to_string()
}

fn default_lock_key() -> String {
    DEFAULT_LOCK_KEY.to_string()
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_lock_ttl_secs() -> u64 {
    60
}

fn default_lock_retry_interval_ms() -> u64 {
    100
}

fn default_empty_pop_delay_ms() -> u64 {
    100
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_key: default_channel_key(),
            lock_key: default_lock_key(),
            max_len: 0,
            timeout_ms: default_timeout_ms(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            empty_pop_delay_ms: default_empty_pop_delay_ms(),
            lock_fencing: LockFencing::default(),
        }
    }
}

impl ChannelConfig {
    pub fn with_channel_key(mut self, key: impl Into<String>) -> Self {
        self.channel_key = key.into();
        self
    }

    pub fn with_lock_key(mut self, key: impl Into<String>) -> Self {
        self.lock_key = key.into();
        self
    }

    pub fn with_max_len(mut self, max_len: u64) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock_retry_interval_ms = saturating_millis(interval);
        self
    }

    pub fn with_empty_pop_delay(mut self, delay: Duration) -> Self {
        self.empty_pop_delay_ms = saturating_millis(delay);
        self
    }

    pub fn with_lock_fencing(mut self, fencing: LockFencing) -> Self {
        self.lock_fencing = fencing;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn empty_pop_delay(&self) -> Duration {
        Duration::from_millis(self.empty_pop_delay_ms)
    }

    /// Checks that cannot be expressed purely with serde.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.channel_key.is_empty(), "channel_key must not be empty");
        anyhow::ensure!(!self.lock_key.is_empty(), "lock_key must not be empty");
        anyhow::ensure!(
            self.channel_key != self.lock_key,
            "channel_key and lock_key must differ"
        );
        anyhow::ensure!(self.timeout_ms > 0, "timeout_ms must be positive");
        anyhow::ensure!(self.lock_ttl_secs > 0, "lock_ttl_secs must be positive");
        anyhow::ensure!(
            self.lock_ttl_secs <= MAX_LOCK_TTL_SECS,
            "lock_ttl_secs must be at most {MAX_LOCK_TTL_SECS}"
        );
        Ok(())
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// KeyDB / Redis target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StoreTarget {
    Single {
        /// Connection string (e.g. `redis://keydb.local:6379`).
        endpoint: String,
        #[serde(default)]
        password: Option<String>,
        /// Name of an environment variable holding the password.  Ignored
        /// when `password` is set.
        #[serde(default)]
        password_env: Option<String>,
        /// Logical database index.
        #[serde(default)]
        db: u8,
        #[serde(default)]
        tls: bool,
    },
    Cluster {
        endpoints: Vec<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        password_env: Option<String>,
        #[serde(default)]
        tls: bool,
    },
}

impl StoreTarget {
    pub fn single(endpoint: impl Into<String>) -> Self {
        Self::Single {
            endpoint: endpoint.into(),
            password: None,
            password_env: None,
            db: 0,
            tls: false,
        }
    }

    pub fn cluster<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Cluster {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            password: None,
            password_env: None,
            tls: false,
        }
    }

    /// Resolve the password, preferring the inline value over the
    /// environment variable.
    pub fn password(&self) -> Option<String> {
        let (password, password_env) = match self {
            Self::Single {
                password,
                password_env,
                ..
            }
            | Self::Cluster {
                password,
                password_env,
                ..
            } => (password, password_env),
        };
        password
            .clone()
            .or_else(|| password_env.as_ref().and_then(|var| std::env::var(var).ok()))
    }

    pub fn tls(&self) -> bool {
        match self {
            Self::Single { tls, .. } | Self::Cluster { tls, .. } => *tls,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Single { endpoint, .. } => {
                anyhow::ensure!(!endpoint.is_empty(), "store endpoint must not be empty");
            }
            Self::Cluster { endpoints, .. } => {
                anyhow::ensure!(
                    !endpoints.is_empty(),
                    "cluster store needs at least one endpoint"
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection bring-up
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectConfig {
    /// Pause (seconds) between failed connection attempts.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Give up after this many attempts.  Unset means retry forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_retry_interval_secs() -> u64 {
    5
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
            max_attempts: None,
        }
    }
}

impl ConnectConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Parse and validate a [`Config`] from YAML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.channel.validate()?;
    config.store.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(
            r#"
store:
  mode: single
  endpoint: redis://127.0.0.1:6379
"#,
        )
        .unwrap();
        assert_eq!(config.channel.channel_key, DEFAULT_CHANNEL_KEY);
        assert_eq!(config.channel.lock_key, DEFAULT_LOCK_KEY);
        assert_eq!(config.channel.max_len, 0);
        assert_eq!(config.channel.timeout(), Duration::from_secs(3));
        assert_eq!(config.channel.lock_ttl(), Duration::from_secs(60));
        assert_eq!(config.channel.lock_retry_interval(), Duration::from_millis(100));
        assert_eq!(config.channel.empty_pop_delay(), Duration::from_millis(100));
        assert_eq!(config.channel.lock_fencing, LockFencing::None);
        assert_eq!(config.connect.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.connect.max_attempts, None);
    }

    #[test]
    fn test_cluster_config() {
        let config = parse_config(
            r#"
channel:
  channel_key: jobs:list
  lock_key: jobs:lock
  max_len: 10
  lock_fencing: token
store:
  mode: cluster
  endpoints: ["10.0.0.1:7000", "10.0.0.2:7000"]
  password: hunter2
connect:
  max_attempts: 3
"#,
        )
        .unwrap();
        assert_eq!(config.channel.max_len, 10);
        assert_eq!(config.channel.lock_fencing, LockFencing::Token);
        assert_eq!(config.store.password().as_deref(), Some("hunter2"));
        assert_eq!(config.connect.max_attempts, Some(3));
        match config.store {
            StoreTarget::Cluster { endpoints, .. } => assert_eq!(endpoints.len(), 2),
            other => panic!("expected cluster target, got {other:?}"),
        }
    }

    #[test]
    fn test_same_channel_and_lock_key_rejected() {
        let result = parse_config(
            r#"
channel:
  channel_key: same
  lock_key: same
store:
  mode: single
  endpoint: localhost
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_cluster_rejected() {
        let result = parse_config(
            r#"
store:
  mode: cluster
  endpoints: []
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ChannelConfig::default()
            .with_channel_key("a")
            .with_lock_key("b")
            .with_max_len(2)
            .with_timeout(Duration::from_millis(250));
        assert_eq!(config.channel_key, "a");
        assert_eq!(config.lock_key, "b");
        assert_eq!(config.max_len, 2);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        config.validate().unwrap();
    }

    #[test]
    fn test_oversized_lock_ttl_rejected() {
        let config = ChannelConfig::default().with_lock_ttl(Duration::from_secs(u64::MAX));
        assert!(config.validate().is_err());
        ChannelConfig::default()
            .with_lock_ttl(Duration::from_secs(MAX_LOCK_TTL_SECS))
            .validate()
            .unwrap();
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = ChannelConfig::default()
            .with_timeout(Duration::MAX)
            .with_empty_pop_delay(Duration::MAX);
        assert_eq!(config.timeout_ms, u64::MAX);
        assert_eq!(config.empty_pop_delay_ms, u64::MAX);
    }
}
