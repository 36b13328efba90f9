//! REST ingress for producers without a persistent connection.
//!
//! One request is equivalent to one `notify` event on a WebSocket.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use relay_common::error::AppError;
use relay_common::types::{ChannelClass, Level, PrincipalKind, WireMessage};

use crate::middleware::auth::AuthPrincipal;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/alert", post(send_alert))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    pub message: String,
    #[serde(default)]
    pub level: Level,
    #[serde(default, alias = "type")]
    pub channel_class: ChannelClass,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Keeps the id stable when a queued message is retried.
    #[serde(default)]
    pub id: Option<String>,
}

impl AlertRequest {
    fn into_message(self) -> WireMessage {
        let mut message = WireMessage::new(self.message, self.level, self.channel_class);
        if let Some(id) = self.id {
            message.id = id;
        }
        message.metadata = self.metadata;
        message
    }
}

/// POST /api/alert: Publish one message.
async fn send_alert(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    if principal.kind != PrincipalKind::Producer {
        return Err(AppError::Forbidden("Only producer tokens can send alerts".to_string()));
    }

    let request: AlertRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid alert body: {}", e)))?;
    let message = request.into_message();
    message.validate()?;

    let message_id = message.id.clone();
    let sender = principal.info();
    state.hub.publish(sender.clone(), message).await;

    if let Err(e) = state.directory.touch_last_seen(principal.id).await {
        tracing::warn!(principal_id = %principal.id, error = %e, "Failed to update last seen");
    }

    Ok(Json(json!({
        "success": true,
        "messageId": message_id,
        "client": sender.name,
        "timestamp": Utc::now(),
    })))
}
