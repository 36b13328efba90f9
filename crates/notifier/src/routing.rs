//! Destination selection.

use relay_common::config::NotifierConfig;
use relay_common::types::{ChannelClass, Level, WireMessage};

/// Destinations by purpose. Only `default` is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRoutes {
    pub default: String,
    pub alerts: Option<String>,
    pub logs: Option<String>,
    pub errors: Option<String>,
}

impl ChannelRoutes {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            alerts: None,
            logs: None,
            errors: None,
        }
    }

    /// Errors go to the errors destination when there is one, then the
    /// message's channel class decides, then the default.
    pub fn select(&self, message: &WireMessage) -> &str {
        if message.level == Level::Error
            && let Some(errors) = &self.errors
        {
            return errors;
        }

        let by_class = match message.channel_class {
            ChannelClass::Alerts => self.alerts.as_deref(),
            ChannelClass::Logs => self.logs.as_deref(),
        };
        by_class.unwrap_or(&self.default)
    }
}

impl From<&NotifierConfig> for ChannelRoutes {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            default: config.route_default.clone(),
            alerts: config.route_alerts.clone(),
            logs: config.route_logs.clone(),
            errors: config.route_errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> ChannelRoutes {
        ChannelRoutes {
            default: "default".to_string(),
            alerts: Some("alerts".to_string()),
            logs: None,
            errors: Some("errors".to_string()),
        }
    }

    #[test]
    fn test_error_level_wins() {
        let msg = WireMessage::new("boom", Level::Error, ChannelClass::Logs);
        assert_eq!(routes().select(&msg), "errors");
    }

    #[test]
    fn test_channel_class_then_default() {
        let alert = WireMessage::new("a", Level::Warn, ChannelClass::Alerts);
        let log = WireMessage::new("l", Level::Info, ChannelClass::Logs);
        assert_eq!(routes().select(&alert), "alerts");
        assert_eq!(routes().select(&log), "default");
    }

    #[test]
    fn test_error_without_errors_route() {
        let only_default = ChannelRoutes::new("default");
        let msg = WireMessage::new("boom", Level::Error, ChannelClass::Alerts);
        assert_eq!(only_default.select(&msg), "default");
    }
}
