//! Scripted backend for deterministic tests.
//!
//! Replies are scripted per agent name and consumed in order; once an agent's
//! script runs out, the backend-wide default reply is used. Every connect,
//! disconnect, interrupt and query is counted or logged so tests can assert on
//! pool and scheduling behavior.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::{BackendError, BackendResult};
use crate::events::{ResponseEvent, ResponseOutcome, ResponseStream};
use crate::session::{Backend, BackendSession, SessionConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Scripted replies
// ─────────────────────────────────────────────────────────────────────────────

/// A latch a scripted reply can wait on. Opening it is idempotent.
#[derive(Clone, Debug, Default)]
pub struct MockGate(CancellationToken);

impl MockGate {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every reply waiting on this gate, now and later.
    pub fn open(&self) {
        self.0.cancel();
    }

    async fn wait(&self) {
        self.0.cancelled().await;
    }
}

/// One scripted reply.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Stream a text reply.
    Text {
        /// Reply text.
        text: String,
        /// Thinking streamed before the text.
        thinking: String,
        /// Rotated resume token reported at stream end.
        resume_token: Option<String>,
    },
    /// Start streaming, then report a skip.
    Skip,
    /// Start streaming, then fail.
    Fail(String),
    /// Fail the query call itself.
    Reject(BackendError),
    /// Sleep, then play the inner reply.
    Delay(Duration, Box<MockReply>),
    /// Wait for the gate, then play the inner reply.
    Gated(MockGate, Box<MockReply>),
    /// Never finish; only dropping the stream ends it.
    Hang,
}

impl MockReply {
    /// Plain text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thinking: String::new(),
            resume_token: None,
        }
    }

    /// Text reply that rotates the resume token.
    pub fn text_with_token(text: impl Into<String>, token: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thinking: String::new(),
            resume_token: Some(token.into()),
        }
    }

    /// Mid-stream failure.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    /// Delay the inner reply.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    /// Hold the inner reply until `gate` opens.
    pub fn gated(gate: &MockGate, inner: MockReply) -> Self {
        Self::Gated(gate.clone(), Box::new(inner))
    }
}

/// Query lifecycle record, in the order events happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallEvent {
    /// The agent's reply stream was first polled.
    Started(String),
    /// The agent's reply stream finished (successfully or not).
    Finished(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    default_reply: Mutex<MockReply>,
    connect_failures: Mutex<VecDeque<BackendError>>,
    connect_delay: Mutex<Duration>,
    hang_on_disconnect: AtomicBool,
    connect_attempts: AtomicUsize,
    sessions_opened: AtomicUsize,
    disconnects: AtomicUsize,
    interrupts: AtomicUsize,
    config_updates: AtomicUsize,
    next_session_id: AtomicU64,
    prompts: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<CallEvent>>,
    opened: Mutex<Vec<SessionConfig>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            scripts: Mutex::default(),
            default_reply: Mutex::new(MockReply::text("ok")),
            connect_failures: Mutex::default(),
            connect_delay: Mutex::new(Duration::ZERO),
            hang_on_disconnect: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            sessions_opened: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            config_updates: AtomicUsize::new(0),
            next_session_id: AtomicU64::new(1),
            prompts: Mutex::default(),
            calls: Mutex::default(),
            opened: Mutex::default(),
        }
    }
}

impl Shared {
    fn next_reply(&self, agent: &str) -> MockReply {
        self.scripts
            .lock()
            .get_mut(agent)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_reply.lock().clone())
    }
}

/// Scripted [`Backend`]. Cheap to clone; clones share scripts and counters.
#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    /// Backend that answers `"ok"` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for `agent`.
    pub fn script(&self, agent: &str, replies: impl IntoIterator<Item = MockReply>) {
        self.shared
            .scripts
            .lock()
            .entry(agent.to_string())
            .or_default()
            .extend(replies);
    }

    /// Reply used once an agent's script is exhausted.
    pub fn set_default_reply(&self, reply: MockReply) {
        *self.shared.default_reply.lock() = reply;
    }

    /// Make the next `n` connects fail with a transport race.
    pub fn fail_next_connects(&self, n: usize) {
        let mut failures = self.shared.connect_failures.lock();
        for _ in 0..n {
            failures.push_back(BackendError::TransportNotReady("transport is not ready".into()));
        }
    }

    /// Make the next connect fail with `err`.
    pub fn push_connect_failure(&self, err: BackendError) {
        self.shared.connect_failures.lock().push_back(err);
    }

    /// Sleep this long inside every connect.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Make `disconnect` never return.
    pub fn hang_on_disconnect(&self, hang: bool) {
        self.shared.hang_on_disconnect.store(hang, Ordering::SeqCst);
    }

    /// Connect calls, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Successful connects.
    pub fn sessions_opened(&self) -> usize {
        self.shared.sessions_opened.load(Ordering::SeqCst)
    }

    /// Completed disconnects.
    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    /// Interrupt calls.
    pub fn interrupts(&self) -> usize {
        self.shared.interrupts.load(Ordering::SeqCst)
    }

    /// In-place config updates.
    pub fn config_updates(&self) -> usize {
        self.shared.config_updates.load(Ordering::SeqCst)
    }

    /// Configs of every opened session, in open order.
    pub fn opened_configs(&self) -> Vec<SessionConfig> {
        self.shared.opened.lock().clone()
    }

    /// Query lifecycle log.
    pub fn calls(&self) -> Vec<CallEvent> {
        self.shared.calls.lock().clone()
    }

    /// Prompts sent by `agent`, oldest first.
    pub fn prompts_for(&self, agent: &str) -> Vec<String> {
        self.shared
            .prompts
            .lock()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Number of queries sent by `agent`.
    pub fn query_count(&self, agent: &str) -> usize {
        self.shared
            .prompts
            .lock()
            .iter()
            .filter(|(a, _)| a == agent)
            .count()
    }

    /// Whether `agent`'s reply stream has started at least once.
    pub fn has_started(&self, agent: &str) -> bool {
        self.shared
            .calls
            .lock()
            .iter()
            .any(|c| matches!(c, CallEvent::Started(a) if a == agent))
    }

    /// Poll until `agent`'s reply stream has started.
    pub async fn wait_for_start(&self, agent: &str) {
        while !self.has_started(agent) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn connect(&self, config: &SessionConfig) -> BackendResult<Arc<dyn BackendSession>> {
        let _ = self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.shared.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.shared.connect_failures.lock().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        let _ = self.shared.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.shared.opened.lock().push(config.clone());
        let session = MockSession {
            id: self.shared.next_session_id.fetch_add(1, Ordering::SeqCst),
            config: Mutex::new(config.clone()),
            shared: Arc::clone(&self.shared),
        };
        Ok(Arc::new(session))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Session handed out by [`MockBackend`].
pub struct MockSession {
    id: u64,
    config: Mutex<SessionConfig>,
    shared: Arc<Shared>,
}

impl MockSession {
    /// Unique id within the backend.
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl BackendSession for MockSession {
    async fn query(&self, prompt: &str) -> BackendResult<ResponseStream> {
        let agent = self.config.lock().agent_name.clone();
        self.shared
            .prompts
            .lock()
            .push((agent.clone(), prompt.to_string()));

        let reply = self.shared.next_reply(&agent);
        if let MockReply::Reject(err) = reply {
            return Err(err);
        }

        let shared = Arc::clone(&self.shared);
        let stream = async_stream::stream! {
            shared.calls.lock().push(CallEvent::Started(agent.clone()));

            let mut current = reply;
            let settled = loop {
                match current {
                    MockReply::Delay(delay, inner) => {
                        tokio::time::sleep(delay).await;
                        current = *inner;
                    }
                    MockReply::Gated(gate, inner) => {
                        gate.wait().await;
                        current = *inner;
                    }
                    MockReply::Hang => {
                        futures::future::pending::<()>().await;
                        current = MockReply::Hang;
                    }
                    other => break other,
                }
            };

            match settled {
                MockReply::Text { text, thinking, resume_token } => {
                    yield Ok(ResponseEvent::StreamStart);
                    if !thinking.is_empty() {
                        yield Ok(ResponseEvent::ThinkingDelta { delta: thinking.clone() });
                    }
                    yield Ok(ResponseEvent::ContentDelta { delta: text.clone() });
                    yield Ok(ResponseEvent::StreamEnd {
                        outcome: ResponseOutcome { text, thinking, resume_token, skipped: false },
                    });
                }
                MockReply::Skip => {
                    yield Ok(ResponseEvent::StreamStart);
                    yield Ok(ResponseEvent::StreamEnd { outcome: ResponseOutcome::skip() });
                }
                MockReply::Fail(message) => {
                    yield Ok(ResponseEvent::StreamStart);
                    yield Err(BackendError::Stream(message));
                }
                MockReply::Reject(err) => {
                    yield Err(err);
                }
                MockReply::Delay(..) | MockReply::Gated(..) | MockReply::Hang => {}
            }

            shared.calls.lock().push(CallEvent::Finished(agent));
        };
        Ok(Box::pin(stream))
    }

    async fn interrupt(&self) -> BackendResult<()> {
        let _ = self.shared.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> BackendResult<()> {
        if self.shared.hang_on_disconnect.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        let _ = self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update_config(&self, config: &SessionConfig) {
        let _ = self.shared.config_updates.fetch_add(1, Ordering::SeqCst);
        *self.config.lock() = config.clone();
    }
}
