//! Backend error types.

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by a backend or one of its sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The transport underneath the session was not ready yet. Transient.
    #[error("transport not ready: {0}")]
    TransportNotReady(String),

    /// Connection establishment failed for any other reason.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The response stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    /// The query was interrupted.
    #[error("cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether this is the transient connect race that is worth retrying.
    pub fn is_transport_race(&self) -> bool {
        matches!(self, Self::TransportNotReady(_))
    }

    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::TransportNotReady(_) => "transport_race",
            Self::Connect(_) => "connect",
            Self::Stream(_) => "stream",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "unknown",
        }
    }
}
