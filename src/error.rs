use std::time::Duration;

/// Errors returned by [`crate::channel::Channel`] operations.
///
/// An empty queue is not an error: `pop` returns `Ok(None)`.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("channel is full ({len}/{max_len})")]
    Full { len: u64, max_len: u64 },

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ChannelError {
    /// `true` for conditions a caller can sensibly retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full { .. } | Self::Timeout(_))
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

/// Errors from bringing up a store connection.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("store unreachable after {attempts} attempts: {last:#}")]
    Exhausted {
        attempts: u32,
        last: anyhow::Error,
    },

    #[error("invalid store configuration: {0:#}")]
    Config(anyhow::Error),
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ChannelError::Full { len: 2, max_len: 2 }.is_recoverable());
        assert!(ChannelError::Timeout(Duration::from_secs(3)).is_recoverable());
        assert!(!ChannelError::Store(anyhow::anyhow!("boom")).is_recoverable());
    }

    #[test]
    fn test_full_message() {
        let err = ChannelError::Full { len: 5, max_len: 5 };
        assert_eq!(err.to_string(), "channel is full (5/5)");
    }
}
