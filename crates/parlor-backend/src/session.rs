//! Backend and session traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BackendResult;
use crate::events::ResponseStream;

/// Everything needed to open (or refresh) one agent's session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Speaking agent's display name.
    pub agent_name: String,
    /// System prompt for the agent.
    pub system_prompt: String,
    /// Token of a previous conversation to resume, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    /// Model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Opens sessions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Establish a new session. May fail with a transient transport race.
    async fn connect(&self, config: &SessionConfig) -> BackendResult<Arc<dyn BackendSession>>;
}

/// A long-lived, stateful connection for one agent in one room.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Send a prompt and stream the reply.
    async fn query(&self, prompt: &str) -> BackendResult<ResponseStream>;

    /// Ask the backend to stop the in-flight query.
    async fn interrupt(&self) -> BackendResult<()>;

    /// Close the session.
    async fn disconnect(&self) -> BackendResult<()>;

    /// Apply changed options (for example an edited system prompt) in place.
    fn update_config(&self, _config: &SessionConfig) {}
}
