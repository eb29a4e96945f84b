//! The persistence interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parlor_core::{Agent, AgentId, Message, NewMessage, Room, RoomId};

use crate::errors::StoreResult;

/// Read/write/query operations the scheduling engine needs.
///
/// Reads may be stale by a bounded interval; the engine re-reads at its own
/// checkpoints instead of relying on strong consistency.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Current room state.
    async fn get_room(&self, room_id: RoomId) -> StoreResult<Room>;

    /// All member agents, critics included, in membership order.
    async fn get_agents(&self, room_id: RoomId) -> StoreResult<Vec<Agent>>;

    /// Assistant messages in the room, skip markers excluded.
    async fn count_assistant_messages(&self, room_id: RoomId) -> StoreResult<u32>;

    /// Persist a message and bump the room's activity time, except for skip markers.
    async fn create_message(&self, room_id: RoomId, message: NewMessage) -> StoreResult<Message>;

    /// The newest `limit` messages, oldest first.
    async fn recent_messages(&self, room_id: RoomId, limit: usize) -> StoreResult<Vec<Message>>;

    /// Stored resume token for an agent's session in a room.
    async fn get_agent_session(&self, room_id: RoomId, agent_id: AgentId) -> StoreResult<Option<String>>;

    /// Persist a rotated resume token.
    async fn set_agent_session(&self, room_id: RoomId, agent_id: AgentId, token: &str) -> StoreResult<()>;

    /// Set or clear the room's finished flag.
    async fn set_room_finished(&self, room_id: RoomId, finished: bool) -> StoreResult<()>;

    /// Rooms with activity at or after `since`.
    async fn list_active_rooms(&self, since: DateTime<Utc>) -> StoreResult<Vec<Room>>;

    /// Record critic output outside the visible history.
    async fn save_critic_feedback(&self, room_id: RoomId, agent_id: AgentId, content: &str) -> StoreResult<()>;
}
