//! Turning input lines into messages.
//!
//! A line is either plain text (sent as an `info` alert) or a JSON object
//! `{"message", "level"?, "channelClass"?, "metadata"?}`.

use serde::Deserialize;

use relay_common::error::AppError;
use relay_common::types::{ChannelClass, Level, WireMessage};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineMessage {
    message: String,
    #[serde(default)]
    level: Level,
    #[serde(default, alias = "type")]
    channel_class: ChannelClass,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<WireMessage, AppError>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed.starts_with('{') {
        return Some(Ok(WireMessage::new(trimmed, Level::Info, ChannelClass::Alerts)));
    }

    let parsed = serde_json::from_str::<LineMessage>(trimmed)
        .map_err(|e| AppError::Validation(format!("invalid message object: {}", e)))
        .map(|line| {
            let message = WireMessage::new(line.message, line.level, line.channel_class);
            match line.metadata {
                Some(metadata) => message.with_metadata(metadata),
                None => message,
            }
        });
    Some(parsed)
}
