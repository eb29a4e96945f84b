//! Streaming response events.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

/// Boxed stream returned by [`BackendSession::query`](crate::BackendSession::query).
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, BackendError>> + Send>>;

/// Terminal payload of a response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOutcome {
    /// Final reply text.
    pub text: String,
    /// Accumulated thinking.
    #[serde(default)]
    pub thinking: String,
    /// Resume token to use for the next session, when the backend rotated it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    /// The agent chose not to speak.
    #[serde(default)]
    pub skipped: bool,
}

impl ResponseOutcome {
    /// A plain text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A skip.
    pub fn skip() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// One event on a response stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEvent {
    /// Generation began.
    StreamStart,
    /// Incremental reply text.
    ContentDelta {
        /// Text chunk.
        delta: String,
    },
    /// Incremental thinking text.
    ThinkingDelta {
        /// Thinking chunk.
        delta: String,
    },
    /// Generation finished.
    StreamEnd {
        /// Final result.
        outcome: ResponseOutcome,
    },
}
