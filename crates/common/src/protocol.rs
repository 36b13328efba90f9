//! Wire protocol spoken between producers, consumers and the router.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`; payload-less events omit `data`.

use serde::{Deserialize, Serialize};

use crate::types::{Notification, PresenceUpdate, PrincipalInfo, PrincipalKind, WireMessage};

/// Events sent by a peer to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// First frame of every session.
    Connect(ConnectRequest),
    /// A producer publishing a message.
    Notify(WireMessage),
    Heartbeat,
    /// Join the dashboard observer group.
    Observe,
}

/// Events sent by the router to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Authenticated(PrincipalInfo),
    Error(ErrorInfo),
    Notify(Notification),
    /// The router accepted and fanned out the message with this id.
    Ack(AckInfo),
    Presence(PresenceUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub token: String,
    pub kind: PrincipalKind,
    pub name: String,
    /// Consumer integration type (e.g. `webhook`), used for per-type groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckInfo {
    pub id: String,
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerEvent {
    pub fn error(reason: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorInfo {
            reason: reason.into(),
        })
    }

    pub fn ack(id: impl Into<String>) -> Self {
        ServerEvent::Ack(AckInfo { id: id.into() })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelClass, Level};

    #[test]
    fn test_connect_frame_shape() {
        let event = ClientEvent::Connect(ConnectRequest {
            token: "ABC123".to_string(),
            kind: PrincipalKind::Producer,
            name: "build-agent".to_string(),
            sink_type: None,
        });
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "connect");
        assert_eq!(json["data"]["token"], "ABC123");
        assert_eq!(json["data"]["kind"], "producer");
        assert!(json["data"].get("sinkType").is_none());
    }

    #[test]
    fn test_heartbeat_without_data() {
        let event = ClientEvent::from_json(r#"{"event":"heartbeat"}"#).unwrap();
        assert_eq!(event, ClientEvent::Heartbeat);
        assert_eq!(ClientEvent::Observe.to_json().unwrap(), r#"{"event":"observe"}"#);
    }

    #[test]
    fn test_notify_carries_wire_message() {
        let msg = WireMessage::new("deploy finished", Level::Success, ChannelClass::Logs);
        let text = ClientEvent::Notify(msg.clone()).to_json().unwrap();
        match ClientEvent::from_json(&text).unwrap() {
            ClientEvent::Notify(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_server_error_and_ack() {
        let json = ServerEvent::error("Invalid token").to_json().unwrap();
        assert_eq!(json, r#"{"event":"error","data":{"reason":"Invalid token"}}"#);

        let ack = ServerEvent::from_json(r#"{"event":"ack","data":{"id":"m-1"}}"#).unwrap();
        assert_eq!(ack, ServerEvent::ack("m-1"));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"stream-message","data":{}}"#).is_err());
    }
}
