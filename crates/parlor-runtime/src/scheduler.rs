//! Background scheduler.
//!
//! Keeps recently active rooms talking without fresh human input by running
//! one autonomous round per eligible room on every tick. Ticks never overlap;
//! a tick that overruns the interval simply delays the next one.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parlor_core::{Room, RoomId};
use parlor_settings::SchedulerSettings;
use parlor_store::{CacheMaintenance, RoomStore};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::background::BackgroundTracker;
use crate::orchestrator::RoomOrchestrator;

/// Periodic driver for autonomous rounds and cache upkeep.
///
/// Dropping the scheduler stops its loops, same as [`stop`](Self::stop)
/// without waiting for the current tick.
pub struct BackgroundScheduler {
    ticker: Arc<Ticker>,
    cache: Option<Arc<dyn CacheMaintenance>>,
    stop: CancellationToken,
    loops: BackgroundTracker,
}

/// What the tick loop owns. Holds nothing that leads back to the scheduler.
struct Ticker {
    orchestrator: Arc<RoomOrchestrator>,
    store: Arc<dyn RoomStore>,
    settings: SchedulerSettings,
}

impl BackgroundScheduler {
    /// Scheduler over `orchestrator`, reading rooms from `store`.
    pub fn new(orchestrator: Arc<RoomOrchestrator>, store: Arc<dyn RoomStore>, settings: SchedulerSettings) -> Self {
        Self {
            ticker: Arc::new(Ticker {
                orchestrator,
                store,
                settings,
            }),
            cache: None,
            stop: CancellationToken::new(),
            loops: BackgroundTracker::new(),
        }
    }

    /// Also evict expired entries from `cache` on its own interval.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheMaintenance>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start the tick loop, plus the cache loop when a cache was given.
    /// Does nothing when the scheduler is disabled.
    pub fn start(&self) {
        let settings = &self.ticker.settings;
        if !settings.enabled {
            info!("background scheduler disabled");
            return;
        }

        let ticker = Arc::clone(&self.ticker);
        let stop = self.stop.clone();
        self.loops.spawn(async move { ticker.run(stop).await });

        if let Some(cache) = self.cache.clone() {
            let stop = self.stop.clone();
            let period = settings.cache_cleanup_interval();
            self.loops.spawn(async move {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        () = stop.cancelled() => break,
                        _ = interval.tick() => {
                            let removed = cache.cleanup_expired();
                            let stats = cache.stats();
                            debug!(removed, hits = stats.hits, misses = stats.misses, entries = stats.entries, "cache cleanup");
                        }
                    }
                }
            });
        }

        info!(
            interval_ms = settings.interval_ms,
            max_rooms = settings.max_concurrent_rooms,
            "background scheduler started"
        );
    }

    /// Stop both loops and wait for the current tick to finish.
    pub async fn stop(&self) {
        self.stop.cancel();
        self.loops.drain_all().await;
        info!("background scheduler stopped");
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// One pass: pick eligible rooms and run an autonomous round in each,
    /// concurrently. Returns how many rooms were advanced.
    pub async fn tick(&self) -> usize {
        self.ticker.tick().await
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl Ticker {
    async fn run(&self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = interval.tick() => {
                    let _ = self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) -> usize {
        let rooms = self.eligible_rooms().await;
        if rooms.is_empty() {
            return 0;
        }

        let results = join_all(rooms.iter().map(|&room_id| self.orchestrator.run_one_autonomous_round(room_id))).await;
        let responses: u32 = results.iter().map(|r| r.total_responses).sum();
        debug!(rooms = rooms.len(), responses, "scheduler tick");
        rooms.len()
    }

    /// Unpaused, unfinished, idle rooms active within the window, most recent
    /// first, capped at the concurrency limit, with enough speaking agents.
    async fn eligible_rooms(&self) -> Vec<RoomId> {
        let window = chrono::Duration::from_std(self.settings.active_window()).unwrap_or_else(|_| chrono::Duration::zero());
        let rooms = match self.store.list_active_rooms(Utc::now() - window).await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(error = %e, "listing active rooms failed");
                return Vec::new();
            }
        };

        let mut candidates: Vec<Room> = rooms
            .into_iter()
            .filter(|room| !room.is_paused && !room.is_finished && !self.orchestrator.is_room_busy(room.id))
            .collect();
        candidates.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        let mut eligible = Vec::new();
        for room in candidates {
            if eligible.len() >= self.settings.max_concurrent_rooms {
                break;
            }
            match self.store.get_agents(room.id).await {
                Ok(agents) => {
                    let speakers = agents.iter().filter(|a| !a.is_critic).count();
                    if speakers >= self.settings.min_agents {
                        eligible.push(room.id);
                    }
                }
                Err(e) => warn!(room_id = %room.id, error = %e, "loading agents failed"),
            }
        }
        eligible
    }
}

impl std::fmt::Debug for BackgroundScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundScheduler")
            .field("settings", &self.ticker.settings)
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parlor_backend::mock::MockBackend;
    use parlor_core::{Agent, NewMessage, ParticipantType, Role};
    use parlor_settings::ParlorSettings;
    use parlor_store::{CachedStore, MemoryStore};

    use super::*;

    fn settings() -> ParlorSettings {
        let mut settings = ParlorSettings::default();
        settings.pool.stabilization_delay_ms = 0;
        settings.orchestrator.shuffle_regular_agents = false;
        settings
    }

    /// Room with `agents` regular agents and one human message to react to.
    async fn room_with(store: &MemoryStore, id: i64, agents: i64) -> RoomId {
        let room_id = store.add_room(Room::new(id, format!("room {id}")));
        for n in 0..agents {
            let agent_id = id * 100 + n;
            store.add_agent(room_id, Agent::new(agent_id, format!("agent {agent_id}"))).unwrap();
        }
        let _ = store
            .create_message(room_id, NewMessage::user("anyone there?", ParticipantType::User, None))
            .await
            .unwrap();
        room_id
    }

    fn replies(store: &MemoryStore, room_id: RoomId) -> usize {
        store
            .messages(room_id)
            .iter()
            .filter(|m| m.role == Role::Assistant && !m.is_skip_marker())
            .count()
    }

    fn scheduler(store: &Arc<MemoryStore>, backend: &MockBackend, tweak: impl FnOnce(&mut SchedulerSettings)) -> BackgroundScheduler {
        let settings = settings();
        let dyn_store: Arc<dyn RoomStore> = store.clone();
        let orchestrator = Arc::new(RoomOrchestrator::from_settings(
            Arc::clone(&dyn_store),
            Arc::new(backend.clone()),
            &settings,
        ));
        let mut scheduler_settings = settings.scheduler;
        tweak(&mut scheduler_settings);
        BackgroundScheduler::new(orchestrator, dyn_store, scheduler_settings)
    }

    #[tokio::test]
    async fn tick_advances_only_eligible_rooms() {
        let store = Arc::new(MemoryStore::new());
        let backend = MockBackend::new();

        let active = room_with(&store, 1, 2).await;
        let paused = room_with(&store, 2, 2).await;
        store.set_paused(paused, true).unwrap();
        let lonely = room_with(&store, 3, 1).await;
        let stale = room_with(&store, 4, 2).await;
        store.set_last_activity(stale, Utc::now() - chrono::Duration::hours(2)).unwrap();

        let scheduler = scheduler(&store, &backend, |_| {});
        assert_eq!(scheduler.tick().await, 1);

        assert_eq!(replies(&store, active), 2);
        assert_eq!(replies(&store, paused), 0);
        assert_eq!(replies(&store, lonely), 0);
        assert_eq!(replies(&store, stale), 0);
    }

    #[tokio::test]
    async fn tick_respects_concurrency_cap_most_recent_first() {
        let store = Arc::new(MemoryStore::new());
        let backend = MockBackend::new();

        let older = room_with(&store, 1, 2).await;
        let newer = room_with(&store, 2, 2).await;
        store.set_last_activity(older, Utc::now() - chrono::Duration::seconds(30)).unwrap();

        let scheduler = scheduler(&store, &backend, |s| s.max_concurrent_rooms = 1);
        assert_eq!(scheduler.tick().await, 1);
        assert_eq!(replies(&store, newer), 2);
        assert_eq!(replies(&store, older), 0);
    }

    #[tokio::test]
    async fn min_agents_is_configurable() {
        let store = Arc::new(MemoryStore::new());
        let backend = MockBackend::new();
        let _ = room_with(&store, 1, 2).await;

        let scheduler = scheduler(&store, &backend, |s| s.min_agents = 3);
        assert_eq!(scheduler.tick().await, 0);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn finished_rooms_are_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let backend = MockBackend::new();
        let room = room_with(&store, 1, 2).await;
        store.set_room_finished(room, true).await.unwrap();

        let scheduler = scheduler(&store, &backend, |_| {});
        assert_eq!(scheduler.tick().await, 0);
    }

    #[tokio::test]
    async fn disabled_scheduler_never_ticks() {
        let store = Arc::new(MemoryStore::new());
        let backend = MockBackend::new();
        let room = room_with(&store, 1, 2).await;

        let scheduler = Arc::new(scheduler(&store, &backend, |s| s.enabled = false));
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert_eq!(replies(&store, room), 0);
        assert!(scheduler.is_stopped());
    }

    #[tokio::test]
    async fn started_scheduler_ticks_until_stopped() {
        let store = Arc::new(MemoryStore::new());
        let backend = MockBackend::new();
        let room = room_with(&store, 1, 2).await;

        let scheduler = Arc::new(scheduler(&store, &backend, |s| s.interval_ms = 10));
        scheduler.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while replies(&store, room) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        scheduler.stop().await;

        let settled = store.messages(room).len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.messages(room).len(), settled);
    }

    #[tokio::test]
    async fn dropping_the_scheduler_stops_ticking() {
        let store = Arc::new(MemoryStore::new());
        let backend = MockBackend::new();
        let room = room_with(&store, 1, 2).await;

        let scheduler = scheduler(&store, &backend, |s| s.interval_ms = 10);
        scheduler.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while replies(&store, room) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        drop(scheduler);

        // let a round that was already running finish
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = store.messages(room).len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.messages(room).len(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_loop_evicts_expired_entries() {
        let memory = Arc::new(MemoryStore::new());
        let room = memory.add_room(Room::new(1, "cached"));
        let cached = Arc::new(CachedStore::new(Arc::clone(&memory), Duration::from_secs(1)));
        let _ = cached.get_room(room).await.unwrap();
        assert_eq!(cached.stats().entries, 1);

        let backend = MockBackend::new();
        let scheduler = Arc::new(
            scheduler(&memory, &backend, |s| {
                s.interval_ms = 60_000;
                s.cache_cleanup_interval_secs = 2;
            })
            .with_cache(cached.clone()),
        );
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(cached.stats().entries, 0);
        scheduler.stop().await;
    }
}
