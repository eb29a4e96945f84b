//! Short-lived read cache over a [`RoomStore`].
//!
//! Room and agent reads happen before every tape cell; caching them for a
//! bounded interval keeps the store quiet while still giving each cell a view
//! that is at most `ttl` old. Writes that change a room evict its entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parlor_core::{Agent, AgentId, Message, NewMessage, Room, RoomId};
use tokio::time::Instant;
use tracing::debug;

use crate::errors::StoreResult;
use crate::store::RoomStore;

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

impl<T: Clone> Entry<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.stored_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

/// Cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads forwarded to the inner store.
    pub misses: u64,
    /// Live entries, expired ones included until the next cleanup.
    pub entries: usize,
}

/// TTL cache over `get_room` and `get_agents`; every other call passes through.
pub struct CachedStore<S> {
    inner: Arc<S>,
    ttl: Duration,
    rooms: DashMap<RoomId, Entry<Room>>,
    agents: DashMap<RoomId, Entry<Vec<Agent>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: RoomStore> CachedStore<S> {
    /// Wrap `inner` with entries living for `ttl`.
    pub fn new(inner: Arc<S>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            rooms: DashMap::new(),
            agents: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Drop cached state for a room after an external write.
    pub fn invalidate_room(&self, room_id: RoomId) {
        let _ = self.rooms.remove(&room_id);
        let _ = self.agents.remove(&room_id);
    }

    /// Evict expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.rooms.len() + self.agents.len();
        self.rooms.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        self.agents.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        let removed = before.saturating_sub(self.rooms.len() + self.agents.len());
        if removed > 0 {
            debug!(removed, "evicted expired cache entries");
        }
        removed
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.rooms.len() + self.agents.len(),
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Periodic upkeep of a cache, independent of what it wraps.
pub trait CacheMaintenance: Send + Sync {
    /// Evict expired entries, returning how many went.
    fn cleanup_expired(&self) -> usize;

    /// Current counters.
    fn stats(&self) -> CacheStats;
}

impl<S: RoomStore> CacheMaintenance for CachedStore<S> {
    fn cleanup_expired(&self) -> usize {
        CachedStore::cleanup_expired(self)
    }

    fn stats(&self) -> CacheStats {
        CachedStore::stats(self)
    }
}

#[async_trait]
impl<S: RoomStore> RoomStore for CachedStore<S> {
    async fn get_room(&self, room_id: RoomId) -> StoreResult<Room> {
        let cached = self.rooms.get(&room_id).and_then(|e| e.fresh(self.ttl));
        if let Some(room) = cached {
            self.record(true);
            return Ok(room);
        }
        self.record(false);
        let room = self.inner.get_room(room_id).await?;
        let _ = self.rooms.insert(
            room_id,
            Entry {
                value: room.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(room)
    }

    async fn get_agents(&self, room_id: RoomId) -> StoreResult<Vec<Agent>> {
        let cached = self.agents.get(&room_id).and_then(|e| e.fresh(self.ttl));
        if let Some(agents) = cached {
            self.record(true);
            return Ok(agents);
        }
        self.record(false);
        let agents = self.inner.get_agents(room_id).await?;
        let _ = self.agents.insert(
            room_id,
            Entry {
                value: agents.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(agents)
    }

    async fn count_assistant_messages(&self, room_id: RoomId) -> StoreResult<u32> {
        self.inner.count_assistant_messages(room_id).await
    }

    async fn create_message(&self, room_id: RoomId, message: NewMessage) -> StoreResult<Message> {
        let stored = self.inner.create_message(room_id, message).await?;
        let _ = self.rooms.remove(&room_id);
        Ok(stored)
    }

    async fn recent_messages(&self, room_id: RoomId, limit: usize) -> StoreResult<Vec<Message>> {
        self.inner.recent_messages(room_id, limit).await
    }

    async fn get_agent_session(&self, room_id: RoomId, agent_id: AgentId) -> StoreResult<Option<String>> {
        self.inner.get_agent_session(room_id, agent_id).await
    }

    async fn set_agent_session(&self, room_id: RoomId, agent_id: AgentId, token: &str) -> StoreResult<()> {
        self.inner.set_agent_session(room_id, agent_id, token).await
    }

    async fn set_room_finished(&self, room_id: RoomId, finished: bool) -> StoreResult<()> {
        self.inner.set_room_finished(room_id, finished).await?;
        let _ = self.rooms.remove(&room_id);
        Ok(())
    }

    async fn list_active_rooms(&self, since: DateTime<Utc>) -> StoreResult<Vec<Room>> {
        self.inner.list_active_rooms(since).await
    }

    async fn save_critic_feedback(&self, room_id: RoomId, agent_id: AgentId, content: &str) -> StoreResult<()> {
        self.inner.save_critic_feedback(room_id, agent_id, content).await
    }
}

#[cfg(test)]
mod tests {
    use parlor_core::ParticipantType;

    use super::*;
    use crate::memory::MemoryStore;

    fn cached(ttl_ms: u64) -> CachedStore<MemoryStore> {
        let store = MemoryStore::new();
        let _ = store.add_room(Room::new(1, "lobby"));
        store.add_agent(RoomId::new(1), Agent::new(10, "Ada")).unwrap();
        CachedStore::new(Arc::new(store), Duration::from_millis(ttl_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn serves_stale_room_within_ttl() {
        let store = cached(1_000);
        let room = RoomId::new(1);
        assert!(!store.get_room(room).await.unwrap().is_paused);

        store.inner().set_paused(room, true).unwrap();
        assert!(!store.get_room(room).await.unwrap().is_paused);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(store.get_room(room).await.unwrap().is_paused);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_invalidate_room() {
        let store = cached(60_000);
        let room = RoomId::new(1);
        let _ = store.get_room(room).await.unwrap();
        store.set_room_finished(room, true).await.unwrap();
        assert!(store.get_room(room).await.unwrap().is_finished);

        let _ = store
            .create_message(room, NewMessage::user("hi", ParticipantType::User, None))
            .await
            .unwrap();
        let _ = store.get_room(room).await.unwrap();
        assert_eq!(store.stats().misses, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_hits() {
        let store = cached(0);
        let _ = store.get_agents(RoomId::new(1)).await.unwrap();
        let _ = store.get_agents(RoomId::new(1)).await.unwrap();
        assert_eq!(store.stats().hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_evicts_expired_only() {
        let store = cached(500);
        let _ = store.get_room(RoomId::new(1)).await.unwrap();
        let _ = store.get_agents(RoomId::new(1)).await.unwrap();
        assert_eq!(store.cleanup_expired(), 0);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(store.cleanup_expired(), 2);
        assert_eq!(store.stats().entries, 0);
    }

    #[tokio::test]
    async fn explicit_invalidation() {
        let store = cached(60_000);
        let _ = store.get_agents(RoomId::new(1)).await.unwrap();
        store.invalidate_room(RoomId::new(1));
        assert_eq!(store.stats().entries, 0);
    }
}
