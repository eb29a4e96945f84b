//! Backend-driven response pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parlor_backend::{BackendSession, ResponseEvent, SessionConfig};
use parlor_core::{NewMessage, SessionKey};
use parlor_settings::ConversationSettings;
use parlor_store::RoomStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{AgentOutcome, InterruptClock, PromptBuilder, ResponsePipeline, ResponseRequest};
use crate::errors::RuntimeError;
use crate::pool::ConnectionPool;

/// What a reply stream produced.
#[derive(Debug, Default)]
struct StreamedReply {
    started: bool,
    text: String,
    thinking: String,
    resume_token: Option<String>,
    skipped: bool,
}

/// Generates replies through pooled backend sessions and persists them.
pub struct BackendPipeline {
    store: Arc<dyn RoomStore>,
    pool: Arc<ConnectionPool>,
    clock: Arc<InterruptClock>,
    conversation: ConversationSettings,
}

impl BackendPipeline {
    /// Pipeline over `store` and `pool`; `clock` is shared with the orchestrator.
    pub fn new(
        store: Arc<dyn RoomStore>,
        pool: Arc<ConnectionPool>,
        clock: Arc<InterruptClock>,
        conversation: ConversationSettings,
    ) -> Self {
        Self {
            store,
            pool,
            clock,
            conversation,
        }
    }

    async fn stream_reply(
        session: &dyn BackendSession,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamedReply, RuntimeError> {
        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            stream = session.query(prompt) => stream?,
        };

        let mut reply = StreamedReply::default();
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    if let Err(e) = session.interrupt().await {
                        warn!(error = %e, "backend interrupt failed");
                    }
                    return Err(RuntimeError::Cancelled);
                }
                event = stream.next() => event,
            };

            match event {
                None => break,
                Some(Ok(ResponseEvent::StreamStart)) => reply.started = true,
                Some(Ok(ResponseEvent::ContentDelta { delta })) => reply.text.push_str(&delta),
                Some(Ok(ResponseEvent::ThinkingDelta { delta })) => reply.thinking.push_str(&delta),
                Some(Ok(ResponseEvent::StreamEnd { outcome })) => {
                    if !outcome.text.is_empty() {
                        reply.text = outcome.text;
                    }
                    if !outcome.thinking.is_empty() {
                        reply.thinking = outcome.thinking;
                    }
                    reply.resume_token = outcome.resume_token;
                    reply.skipped = outcome.skipped;
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl ResponsePipeline for BackendPipeline {
    #[instrument(
        skip_all,
        fields(room_id = %request.room_id, agent_id = %request.agent.id, critic = request.is_critic)
    )]
    async fn respond(&self, request: ResponseRequest<'_>) -> Result<AgentOutcome, RuntimeError> {
        let ResponseRequest {
            room_id,
            agent,
            user_message,
            participant_count,
            is_critic,
            cancel,
        } = request;
        let started = self.clock.now();

        let history = self
            .store
            .recent_messages(room_id, self.conversation.history_limit)
            .await?;
        let builder = PromptBuilder::new(&self.conversation);
        let prompt = match builder.build(&history, agent, participant_count) {
            Some(prompt) => prompt,
            None if user_message.is_none() && !is_critic => {
                debug!(agent = %agent.name, "nothing new since last reply, skipping");
                return Ok(AgentOutcome::Skipped);
            }
            None => builder.fallback().to_string(),
        };

        let key = SessionKey::new(room_id, agent.id);
        let stored_token = self.store.get_agent_session(room_id, agent.id).await?;
        let config = SessionConfig {
            agent_name: agent.name.clone(),
            system_prompt: agent.system_prompt.clone(),
            resume_token: stored_token.clone(),
            model: None,
        };

        let (session, is_new) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            pooled = self.pool.get_or_create(key, &config) => pooled?,
        };
        debug!(is_new, "session ready");

        let reply = Self::stream_reply(session.as_ref(), &prompt, cancel).await?;

        if let Some(token) = reply.resume_token.as_deref() {
            if stored_token.as_deref() != Some(token) {
                self.store.set_agent_session(room_id, agent.id, token).await?;
                self.pool.note_resume_token(key, token);
                debug!("resume token rotated");
            }
        }

        if reply.skipped || reply.text.trim().is_empty() {
            if reply.started && !is_critic {
                let marker = NewMessage::skip(agent.id, agent.name.as_str());
                let _ = self.store.create_message(room_id, marker).await?;
            }
            debug!(agent = %agent.name, "agent skipped");
            return Ok(AgentOutcome::Skipped);
        }

        if cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        if self.clock.is_stale(room_id, started) {
            info!(agent = %agent.name, "reply overtaken by a newer human message, discarding");
            return Ok(AgentOutcome::Discarded);
        }
        if self.store.get_room(room_id).await?.is_paused {
            info!(agent = %agent.name, "room paused during generation, discarding reply");
            return Ok(AgentOutcome::Discarded);
        }

        if is_critic {
            self.store
                .save_critic_feedback(room_id, agent.id, &reply.text)
                .await?;
            info!(agent = %agent.name, "critic feedback stored");
        } else {
            let message =
                NewMessage::assistant(agent.id, agent.name.as_str(), reply.text).with_thinking(reply.thinking);
            let saved = self.store.create_message(room_id, message).await?;
            info!(agent = %agent.name, message_id = %saved.id, "reply stored");
        }
        Ok(AgentOutcome::Responded)
    }
}
