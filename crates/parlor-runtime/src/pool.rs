//! Connection pool: one live backend session per `(room, agent)`.
//!
//! Reuse of a pooled session takes no lock beyond the map lookup. Creation is
//! serialized per key by an async mutex, and bounded across all keys by a
//! semaphore so a burst of new rooms cannot flood the backend transport.
//! Teardown always runs on the [`BackgroundTracker`], never on the caller.

use std::sync::Arc;

use dashmap::DashMap;
use parlor_backend::{Backend, BackendError, BackendResult, BackendSession, SessionConfig};
use parlor_core::retry::{DEFAULT_MAX_DELAY_MS, RetryConfig};
use parlor_core::{AgentId, RoomId, SessionKey};
use parlor_settings::PoolSettings;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};

use crate::background::BackgroundTracker;

#[derive(Clone)]
struct PooledSession {
    session: Arc<dyn BackendSession>,
    resume_token: Option<String>,
}

/// Pool of backend sessions keyed by [`SessionKey`].
pub struct ConnectionPool {
    backend: Arc<dyn Backend>,
    settings: PoolSettings,
    retry: RetryConfig,
    sessions: DashMap<SessionKey, PooledSession>,
    key_locks: DashMap<SessionKey, Arc<AsyncMutex<()>>>,
    connect_permits: Semaphore,
    teardowns: BackgroundTracker,
}

impl ConnectionPool {
    /// Create an empty pool over `backend`.
    pub fn new(backend: Arc<dyn Backend>, settings: PoolSettings) -> Self {
        let retry = RetryConfig {
            max_retries: settings.connect_retries.saturating_sub(1),
            base_delay_ms: settings.connect_backoff_base_ms,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        };
        let permits = settings.max_concurrent_connections.max(1);
        Self {
            backend,
            settings,
            retry,
            sessions: DashMap::new(),
            key_locks: DashMap::new(),
            connect_permits: Semaphore::new(permits),
            teardowns: BackgroundTracker::new(),
        }
    }

    /// Return the pooled session for `key`, creating it if needed.
    ///
    /// The flag is `true` when a new connection was established. A pooled
    /// session whose resume token differs from `config`'s is dropped from the
    /// pool and torn down in the background before a replacement is created.
    pub async fn get_or_create(
        &self,
        key: SessionKey,
        config: &SessionConfig,
    ) -> BackendResult<(Arc<dyn BackendSession>, bool)> {
        if let Some(session) = self.reuse(key, config) {
            return Ok((session, false));
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if let Some(session) = self.reuse(key, config) {
            return Ok((session, false));
        }

        let _permit = self
            .connect_permits
            .acquire()
            .await
            .map_err(|_| BackendError::Other("connection pool closed".into()))?;

        let session = self.connect_with_retry(key, config).await?;
        let displaced = self.sessions.insert(
            key,
            PooledSession {
                session: Arc::clone(&session),
                resume_token: config.resume_token.clone(),
            },
        );
        info!(%key, resumed = config.resume_token.is_some(), "session connected");
        if let Some(displaced) = displaced {
            warn!(%key, "displaced a live session, tearing it down");
            self.schedule_teardown(key, displaced.session);
        }

        let settle = self.settings.stabilization_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok((session, true))
    }

    /// Record that the live session for `key` now answers to `token`.
    ///
    /// Called when the backend rotates the token mid-session, so the next
    /// request carrying the new token reuses the session instead of replacing it.
    pub fn note_resume_token(&self, key: SessionKey, token: &str) {
        if let Some(mut pooled) = self.sessions.get_mut(&key) {
            pooled.resume_token = Some(token.to_string());
        }
    }

    fn reuse(&self, key: SessionKey, config: &SessionConfig) -> Option<Arc<dyn BackendSession>> {
        {
            let pooled = self.sessions.get(&key)?;
            if pooled.resume_token == config.resume_token {
                pooled.session.update_config(config);
                return Some(Arc::clone(&pooled.session));
            }
        }

        if let Some((_, stale)) = self
            .sessions
            .remove_if(&key, |_, pooled| pooled.resume_token != config.resume_token)
        {
            info!(%key, "resume token changed, replacing session");
            self.schedule_teardown(key, stale.session);
        }
        None
    }

    fn key_lock(&self, key: SessionKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.key_locks.entry(key).or_default().value())
    }

    async fn connect_with_retry(
        &self,
        key: SessionKey,
        config: &SessionConfig,
    ) -> BackendResult<Arc<dyn BackendSession>> {
        let mut attempt = 0;
        loop {
            match self.backend.connect(config).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_transport_race() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        %key,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transport not ready, retrying connect"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(%key, error = %e, category = e.category(), "connect failed");
                    return Err(e);
                }
            }
        }
    }

    fn schedule_teardown(&self, key: SessionKey, session: Arc<dyn BackendSession>) {
        let timeout = self.settings.disconnect_timeout();
        self.teardowns.spawn(async move {
            match tokio::time::timeout(timeout, session.disconnect()).await {
                Ok(Ok(())) => debug!(%key, "session disconnected"),
                Ok(Err(e)) => warn!(%key, error = %e, "session disconnect failed"),
                Err(_) => warn!(
                    %key,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "session disconnect timed out, abandoning"
                ),
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cleanup
    // ─────────────────────────────────────────────────────────────────────

    /// Remove `key` from the pool and disconnect it in the background.
    ///
    /// Returns whether a session was pooled. Never waits for the disconnect.
    /// The key's creation lock is kept so a connect already in flight still
    /// serializes later callers.
    pub fn cleanup(&self, key: SessionKey) -> bool {
        match self.sessions.remove(&key) {
            Some((_, pooled)) => {
                self.schedule_teardown(key, pooled.session);
                true
            }
            None => false,
        }
    }

    /// Clean up every session in `room_id`. Returns how many were pooled.
    pub fn cleanup_room(&self, room_id: RoomId) -> usize {
        let keys: Vec<SessionKey> = self
            .keys()
            .into_iter()
            .filter(|k| k.room_id == room_id)
            .collect();
        keys.into_iter().filter(|&k| self.cleanup(k)).count()
    }

    /// Clean up every session of `agent_id`, across rooms.
    pub fn cleanup_agent(&self, agent_id: AgentId) -> usize {
        self.keys_for_agent(agent_id)
            .into_iter()
            .filter(|&k| self.cleanup(k))
            .count()
    }

    /// Clean up everything, then wait for teardowns up to the shutdown timeout.
    ///
    /// Returns `false` if some teardowns were still running at the deadline.
    pub async fn shutdown_all(&self) -> bool {
        let keys = self.keys();
        let count = keys.len();
        for key in keys {
            let _ = self.cleanup(key);
        }
        let drained = self
            .teardowns
            .drain_with_timeout(self.settings.shutdown_timeout())
            .await;
        if drained {
            info!(sessions = count, "connection pool shut down");
        } else {
            warn!(sessions = count, "connection pool shutdown timed out with teardowns pending");
        }
        drained
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────

    /// Pooled keys, sorted.
    pub fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.sessions.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        keys
    }

    /// Pooled keys belonging to `agent_id`, sorted.
    pub fn keys_for_agent(&self, agent_id: AgentId) -> Vec<SessionKey> {
        self.keys()
            .into_iter()
            .filter(|k| k.agent_id == agent_id)
            .collect()
    }

    /// Number of pooled sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the pool holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Background teardowns not yet finished.
    pub fn pending_teardowns(&self) -> usize {
        self.teardowns.pending_count()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("sessions", &self.sessions.len())
            .field("pending_teardowns", &self.teardowns.pending_count())
            .finish_non_exhaustive()
    }
}
