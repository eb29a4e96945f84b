//! Per-room record of the latest human message.
//!
//! Uses a process-wide tick counter instead of wall-clock time, so "started
//! before the latest human message" is a plain integer comparison that cannot
//! be fooled by clock resolution.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parlor_core::RoomId;

/// Staleness clock shared by the orchestrator (writer) and pipelines (readers).
#[derive(Debug, Default)]
pub struct InterruptClock {
    ticks: AtomicU64,
    last_human: DashMap<RoomId, u64>,
}

impl InterruptClock {
    /// Fresh clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tick. Take this when a generation starts.
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Record a human message arriving in `room_id` and return its tick.
    pub fn record_human_message(&self, room_id: RoomId) -> u64 {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.last_human.insert(room_id, tick);
        tick
    }

    /// Tick of the latest human message in `room_id`.
    pub fn last_human_message(&self, room_id: RoomId) -> Option<u64> {
        self.last_human.get(&room_id).map(|t| *t)
    }

    /// Whether a generation started at `started` has been overtaken by a
    /// human message.
    pub fn is_stale(&self, room_id: RoomId, started: u64) -> bool {
        self.last_human_message(room_id).is_some_and(|t| t > started)
    }

    /// Drop the record for a deleted room.
    pub fn forget(&self, room_id: RoomId) {
        let _ = self.last_human.remove(&room_id);
    }
}
