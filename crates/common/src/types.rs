use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Maximum accepted length of a notification body, in characters.
pub const MAX_BODY_CHARS: usize = 10_000;

/// Notification severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Info,
    Success,
    #[serde(alias = "warning")]
    Warn,
    Error,
    Debug,
}

/// Stream a notification belongs to; drives destination selection downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelClass {
    Logs,
    #[default]
    Alerts,
}

/// The canonical notification record moving through the pipeline.
///
/// `id` survives every requeue unchanged and `attempt` only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub channel_class: ChannelClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt: u32,
}

impl WireMessage {
    pub fn new(body: impl Into<String>, level: Level, channel_class: ChannelClass) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
            level,
            channel_class,
            metadata: None,
            created_at: Utc::now(),
            attempt: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reject payloads that must never be queued or retried.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation("message id must not be empty".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(AppError::Validation("message must not be empty".to_string()));
        }
        let chars = self.body.chars().count();
        if chars > MAX_BODY_CHARS {
            return Err(AppError::Validation(format!(
                "message is {} characters, limit is {}",
                chars, MAX_BODY_CHARS
            )));
        }
        Ok(())
    }
}

/// Kind of an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Producer,
    Consumer,
}

/// A registered producer or consumer identity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub display_name: String,
    pub auth_token: String,
    pub kind: PrincipalKind,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn new(display_name: impl Into<String>, auth_token: impl Into<String>, kind: PrincipalKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            auth_token: auth_token.into(),
            kind,
            last_seen_at: None,
        }
    }

    pub fn info(&self) -> PrincipalInfo {
        PrincipalInfo {
            id: self.id,
            name: self.display_name.clone(),
            kind: self.kind,
        }
    }
}

/// Public view of a principal; never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalInfo {
    pub id: Uuid,
    pub name: String,
    pub kind: PrincipalKind,
}

/// A message as fanned out by the router, tagged with who sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub message: WireMessage,
    pub sender: PrincipalInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Connect/disconnect event delivered to dashboard observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub principal: PrincipalInfo,
    pub status: PresenceStatus,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Success => write!(f, "success"),
            Level::Warn => write!(f, "warn"),
            Level::Error => write!(f, "error"),
            Level::Debug => write!(f, "debug"),
        }
    }
}

impl std::fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelClass::Logs => write!(f, "logs"),
            ChannelClass::Alerts => write!(f, "alerts"),
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalKind::Producer => write!(f, "producer"),
            PrincipalKind::Consumer => write!(f, "consumer"),
        }
    }
}

impl std::str::FromStr for PrincipalKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "producer" => Ok(PrincipalKind::Producer),
            "consumer" => Ok(PrincipalKind::Consumer),
            other => Err(AppError::Validation(format!("unknown principal kind '{}'", other))),
        }
    }
}
