use std::sync::Arc;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Prometheus counters for channel and lock activity.
#[derive(Debug, Default)]
pub struct Metrics {
    // -- channel --
    pub push_total: Counter,
    pub push_rejected: Counter,
    pub pop_total: Counter,
    pub pop_empty: Counter,
    pub timeouts: Counter,

    // -- locks --
    pub lock_acquisitions: Counter,
    pub lock_waits: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();

        registry.register(
            "redchan_push",
            "Values accepted by push",
            metrics.push_total.clone(),
        );
        registry.register(
            "redchan_push_rejected",
            "Pushes rejected because the channel was full",
            metrics.push_rejected.clone(),
        );
        registry.register(
            "redchan_pop",
            "Values returned by pop",
            metrics.pop_total.clone(),
        );
        registry.register(
            "redchan_pop_empty",
            "Pops that found the channel empty",
            metrics.pop_empty.clone(),
        );
        registry.register(
            "redchan_timeouts",
            "Channel operations that exceeded the per-operation timeout",
            metrics.timeouts.clone(),
        );
        registry.register(
            "redchan_lock_acquisitions",
            "Distributed lock acquisitions",
            metrics.lock_acquisitions.clone(),
        );
        registry.register(
            "redchan_lock_waits",
            "Lock attempts that found the lock held",
            metrics.lock_waits.clone(),
        );

        metrics
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper pairing the registry with its metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all channel metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_registered_counters() {
        let registry = MetricsRegistry::new();
        registry.metrics.push_total.inc();
        let text = registry.encode().unwrap();
        assert!(text.contains("redchan_push_total 1"));
        assert!(text.contains("redchan_lock_waits_total 0"));
    }
}
