use std::time::Duration;

use thiserror::Error;

/// Errors raised by a destination sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Destination not found: {0}")]
    NotFound(String),

    /// The destination is throttling us; not counted as a failed attempt.
    #[error("Throttled by destination")]
    Throttled { retry_after: Option<Duration> },

    #[error("Destination returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Transport(err.to_string())
    }
}

/// Errors that end a consumer run.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Gave up after {0} reconnect attempts")]
    GaveUp(u32),
}

/// Reasons a single router session ended.
#[derive(Debug, Error)]
pub(crate) enum SessionEnd {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out waiting for the router")]
    Timeout,

    #[error("Connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionEnd {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SessionEnd::Closed,
            other => SessionEnd::Connect(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SessionEnd {
    fn from(err: serde_json::Error) -> Self {
        SessionEnd::Connect(format!("serialization failed: {}", err))
    }
}
