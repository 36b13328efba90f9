use thiserror::Error;

/// Errors raised by the local durable queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing file could not be written; in-memory state was left untouched.
    #[error("Queue storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue capacity must be at least 1")]
    InvalidCapacity,
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by a router link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The router answered but refused the message.
    #[error("Rejected by router: {0}")]
    Rejected(String),

    #[error("Timed out waiting for the router")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl LinkError {
    /// Connectivity failures take the session offline and are retried with backoff.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            LinkError::Connect(_) | LinkError::Timeout | LinkError::Closed | LinkError::Transport(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => LinkError::Closed,
            other => LinkError::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinkError::Timeout
        } else if err.is_connect() {
            LinkError::Connect(err.to_string())
        } else {
            LinkError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Transport(format!("serialization failed: {}", err))
    }
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Errors returned by a `SessionHandle`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Delivery session has stopped")]
    Closed,

    #[error(transparent)]
    Queue(#[from] QueueError),
}
