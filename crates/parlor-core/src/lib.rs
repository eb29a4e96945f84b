//! # parlor-core
//!
//! Foundation types shared by every Parlor crate.
//!
//! - **Branded IDs**: `RoomId`, `AgentId`, `MessageId` as numeric newtypes, plus the
//!   `SessionKey` that addresses one pooled backend session
//! - **Entities**: `Agent`, `Room`, `Message`, `NewMessage`, `IncomingMessage`
//! - **Retry**: exponential backoff math used by the connection pool
//! - **Logging**: `tracing` subscriber bootstrap and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod agent;
pub mod constants;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod retry;
pub mod room;

pub use agent::Agent;
pub use ids::{AgentId, MessageId, RoomId, SessionKey};
pub use messages::{IncomingMessage, Message, NewMessage, ParticipantType, Role};
pub use room::Room;
