//! Connection pool and read cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection pool tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Concurrent connection establishments across all keys.
    pub max_concurrent_connections: usize,
    /// Total connect attempts when the transport was not ready yet.
    pub connect_retries: u32,
    /// Base backoff between retries.
    pub connect_backoff_base_ms: u64,
    /// Pause after a successful connect before the session is handed out.
    pub stabilization_delay_ms: u64,
    /// Per-session teardown timeout.
    pub disconnect_timeout_ms: u64,
    /// How long `shutdown_all` waits for pending teardowns.
    pub shutdown_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent_connections: 10,
            connect_retries: 3,
            connect_backoff_base_ms: 300,
            stabilization_delay_ms: 50,
            disconnect_timeout_ms: 5_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl PoolSettings {
    /// Per-session teardown timeout.
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Post-connect stabilization delay.
    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }
}

/// Short-lived read cache over room and agent lookups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Entry lifetime; bounds how stale a scheduling read may be.
    pub ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_ms: 1_000 }
    }
}

impl CacheSettings {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}
