//! Rich and plain representations of a notification.

use serde_json::{Value, json};

use relay_common::types::{ChannelClass, Level, Notification};

#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// Structured card: title, description, colour, fields.
    Rich(Value),
    Plain(String),
}

/// Field values longer than this are left out of the rich form.
const MAX_FIELD_CHARS: usize = 1024;

pub fn level_colour(level: Level) -> u32 {
    match level {
        Level::Info => 0x3498db,
        Level::Success => 0x2ecc71,
        Level::Warn => 0xf39c12,
        Level::Error => 0xe74c3c,
        Level::Debug => 0x95a5a6,
    }
}

fn title(notification: &Notification) -> String {
    let kind = match notification.message.channel_class {
        ChannelClass::Alerts => "Alert",
        ChannelClass::Logs => "Log",
    };
    let level = notification.message.level.to_string();
    let mut chars = level.chars();
    let level = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("{} - {}", kind, level)
}

fn metadata_lines(notification: &Notification) -> Option<String> {
    let metadata = notification.message.metadata.as_ref().filter(|m| !m.is_empty())?;
    Some(
        metadata
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}: {}", key, s),
                other => format!("{}: {}", key, other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

pub fn rich(notification: &Notification) -> Rendered {
    let message = &notification.message;
    let mut fields = vec![
        json!({"name": "Client", "value": notification.sender.name, "inline": true}),
        json!({"name": "Level", "value": message.level.to_string().to_uppercase(), "inline": true}),
        json!({"name": "Type", "value": message.channel_class.to_string().to_uppercase(), "inline": true}),
    ];
    if let Some(metadata) = metadata_lines(notification)
        && metadata.chars().count() <= MAX_FIELD_CHARS
    {
        fields.push(json!({"name": "Metadata", "value": metadata, "inline": false}));
    }

    Rendered::Rich(json!({
        "title": title(notification),
        "description": message.body,
        "color": level_colour(message.level),
        "timestamp": message.created_at,
        "fields": fields,
    }))
}

pub fn plain(notification: &Notification) -> Rendered {
    let message = &notification.message;
    let mut text = format!(
        "[{}] {}\nClient: {}\nTime: {}\nType: {}",
        message.level.to_string().to_uppercase(),
        message.body,
        notification.sender.name,
        message.created_at.to_rfc3339(),
        message.channel_class.to_string().to_uppercase(),
    );
    if let Some(metadata) = metadata_lines(notification) {
        text.push_str("\nMetadata:\n");
        text.push_str(&metadata);
    }
    Rendered::Plain(text)
}
