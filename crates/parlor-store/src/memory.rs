//! In-process [`RoomStore`].
//!
//! Used by tests and by embedders that do not need durable storage. The admin
//! helpers (`add_room`, `set_paused`, ...) stand in for the external writers
//! that mutate rooms between scheduler checkpoints.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use parlor_core::{Agent, AgentId, Message, MessageId, NewMessage, Role, Room, RoomId, SessionKey};

use crate::errors::{StoreError, StoreResult};
use crate::store::RoomStore;

#[derive(Default)]
struct Inner {
    rooms: HashMap<RoomId, Room>,
    agents: HashMap<AgentId, Agent>,
    messages: HashMap<RoomId, Vec<Message>>,
    sessions: HashMap<SessionKey, String>,
    feedback: HashMap<RoomId, Vec<(AgentId, String)>>,
    next_message_id: i64,
}

impl Inner {
    fn room_mut(&mut self, room_id: RoomId) -> StoreResult<&mut Room> {
        self.rooms
            .get_mut(&room_id)
            .ok_or_else(|| StoreError::not_found("room", room_id))
    }
}

/// Hash-map backed store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Admin helpers ───────────────────────────────────────────────

    /// Insert or replace a room.
    pub fn add_room(&self, room: Room) -> RoomId {
        let id = room.id;
        let _ = self.inner.write().rooms.insert(id, room);
        id
    }

    /// Register `agent` and make it a member of `room_id`.
    pub fn add_agent(&self, room_id: RoomId, agent: Agent) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let agent_id = agent.id;
        let room = inner.room_mut(room_id)?;
        if !room.agent_ids.contains(&agent_id) {
            room.agent_ids.push(agent_id);
        }
        let _ = inner.agents.insert(agent_id, agent);
        Ok(())
    }

    /// Drop `agent_id` from the room's roster.
    pub fn remove_agent(&self, room_id: RoomId, agent_id: AgentId) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.room_mut(room_id)?.agent_ids.retain(|id| *id != agent_id);
        Ok(())
    }

    /// Toggle the pause flag.
    pub fn set_paused(&self, room_id: RoomId, paused: bool) -> StoreResult<()> {
        self.inner.write().room_mut(room_id)?.is_paused = paused;
        Ok(())
    }

    /// Set the interaction cap.
    pub fn set_max_interactions(&self, room_id: RoomId, max: Option<u32>) -> StoreResult<()> {
        self.inner.write().room_mut(room_id)?.max_interactions = max;
        Ok(())
    }

    /// Overwrite the room's last activity time.
    pub fn set_last_activity(&self, room_id: RoomId, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.write().room_mut(room_id)?.last_activity_at = at;
        Ok(())
    }

    /// Every message in the room, oldest first.
    pub fn messages(&self, room_id: RoomId) -> Vec<Message> {
        self.inner
            .read()
            .messages
            .get(&room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Critic feedback recorded for the room.
    pub fn critic_feedback(&self, room_id: RoomId) -> Vec<(AgentId, String)> {
        self.inner
            .read()
            .feedback
            .get(&room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored resume token, synchronously.
    pub fn agent_session(&self, room_id: RoomId, agent_id: AgentId) -> Option<String> {
        self.inner
            .read()
            .sessions
            .get(&SessionKey::new(room_id, agent_id))
            .cloned()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn get_room(&self, room_id: RoomId) -> StoreResult<Room> {
        self.inner
            .read()
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("room", room_id))
    }

    async fn get_agents(&self, room_id: RoomId) -> StoreResult<Vec<Agent>> {
        let inner = self.inner.read();
        let room = inner
            .rooms
            .get(&room_id)
            .ok_or_else(|| StoreError::not_found("room", room_id))?;
        Ok(room
            .agent_ids
            .iter()
            .filter_map(|id| inner.agents.get(id).cloned())
            .collect())
    }

    async fn count_assistant_messages(&self, room_id: RoomId) -> StoreResult<u32> {
        let inner = self.inner.read();
        let count = inner
            .messages
            .get(&room_id)
            .map_or(0, |msgs| {
                msgs.iter()
                    .filter(|m| m.role == Role::Assistant && !m.is_skip_marker())
                    .count()
            });
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn create_message(&self, room_id: RoomId, message: NewMessage) -> StoreResult<Message> {
        let mut inner = self.inner.write();
        let now = Utc::now();
        let room = inner.room_mut(room_id)?;
        if !message.is_skip_marker() {
            room.last_activity_at = now;
        }

        inner.next_message_id += 1;
        let stored = Message {
            id: MessageId::new(inner.next_message_id),
            room_id,
            role: message.role,
            agent_id: message.agent_id,
            speaker: message.speaker,
            content: message.content,
            thinking: message.thinking,
            participant_type: message.participant_type,
            timestamp: now,
        };
        inner.messages.entry(room_id).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(&self, room_id: RoomId, limit: usize) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read();
        let msgs = inner.messages.get(&room_id).map_or(&[][..], Vec::as_slice);
        let start = msgs.len().saturating_sub(limit);
        Ok(msgs[start..].to_vec())
    }

    async fn get_agent_session(&self, room_id: RoomId, agent_id: AgentId) -> StoreResult<Option<String>> {
        Ok(self.agent_session(room_id, agent_id))
    }

    async fn set_agent_session(&self, room_id: RoomId, agent_id: AgentId, token: &str) -> StoreResult<()> {
        let _ = self
            .inner
            .write()
            .sessions
            .insert(SessionKey::new(room_id, agent_id), token.to_string());
        Ok(())
    }

    async fn set_room_finished(&self, room_id: RoomId, finished: bool) -> StoreResult<()> {
        self.inner.write().room_mut(room_id)?.is_finished = finished;
        Ok(())
    }

    async fn list_active_rooms(&self, since: DateTime<Utc>) -> StoreResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .inner
            .read()
            .rooms
            .values()
            .filter(|r| r.last_activity_at >= since)
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn save_critic_feedback(&self, room_id: RoomId, agent_id: AgentId, content: &str) -> StoreResult<()> {
        self.inner
            .write()
            .feedback
            .entry(room_id)
            .or_default()
            .push((agent_id, content.to_string()));
        Ok(())
    }
}
