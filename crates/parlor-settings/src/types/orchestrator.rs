//! Round orchestration and background scheduling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied to each human-triggered conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Follow-up rounds after the initial round.
    pub max_follow_up_rounds: u32,
    /// Safety cap on messages produced by one tape run.
    pub max_total_messages: u32,
    /// How long shutdown waits for in-flight rounds.
    pub shutdown_timeout_ms: u64,
    /// Shuffle regular agents before each tape.
    pub shuffle_regular_agents: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_follow_up_rounds: 5,
            max_total_messages: 30,
            shutdown_timeout_ms: 5_000,
            shuffle_regular_agents: true,
        }
    }
}

impl OrchestratorSettings {
    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Periodic driver for rooms without fresh human input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Whether the scheduler starts at all.
    pub enabled: bool,
    /// Tick interval.
    pub interval_ms: u64,
    /// Rooms advanced concurrently per tick.
    pub max_concurrent_rooms: usize,
    /// Rooms idle longer than this are left alone.
    pub active_window_secs: u64,
    /// Cache eviction interval.
    pub cache_cleanup_interval_secs: u64,
    /// Minimum non-critic agents for a room to qualify.
    pub min_agents: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2_000,
            max_concurrent_rooms: 5,
            active_window_secs: 300,
            cache_cleanup_interval_secs: 300,
            min_agents: 2,
        }
    }
}

impl SchedulerSettings {
    /// Tick interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Activity window.
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    /// Cache cleanup interval.
    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_secs)
    }
}
