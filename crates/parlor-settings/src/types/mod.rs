//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file only needs the keys it overrides.

mod conversation;
mod orchestrator;
mod pool;

pub use conversation::*;
pub use orchestrator::*;
pub use pool::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParlorSettings {
    /// Round orchestration limits.
    pub orchestrator: OrchestratorSettings,
    /// Connection pool tuning.
    pub pool: PoolSettings,
    /// Background scheduler.
    pub scheduler: SchedulerSettings,
    /// Read cache over the store.
    pub cache: CacheSettings,
    /// Prompt assembly.
    pub conversation: ConversationSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl ParlorSettings {
    /// Reject values that would stall the engine.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_concurrent_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "pool.maxConcurrentConnections must be at least 1".into(),
            ));
        }
        if self.scheduler.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "scheduler.intervalMs must be at least 1".into(),
            ));
        }
        if self.scheduler.max_concurrent_rooms == 0 {
            return Err(SettingsError::InvalidValue(
                "scheduler.maxConcurrentRooms must be at least 1".into(),
            ));
        }
        if self.orchestrator.max_total_messages == 0 {
            return Err(SettingsError::InvalidValue(
                "orchestrator.maxTotalMessages must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
