//! REST link: one `POST /api/alert` per message.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use relay_common::types::WireMessage;

use super::{RouterConnector, RouterLink};
use crate::error::{LinkError, LinkResult};

#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpConnector {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> LinkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

impl RouterConnector for HttpConnector {
    type Link = HttpLink;

    /// There is no session to open; probing `/health` tells us the router is up.
    async fn connect(&self) -> LinkResult<HttpLink> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LinkError::Connect(format!(
                "health check returned {}",
                response.status()
            )));
        }

        Ok(HttpLink {
            client: self.client.clone(),
            alert_url: format!("{}/api/alert", self.base_url),
            token: self.token.clone(),
        })
    }
}

pub struct HttpLink {
    client: reqwest::Client,
    alert_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl RouterLink for HttpLink {
    async fn deliver(&mut self, message: &WireMessage) -> LinkResult<()> {
        let body = json!({
            "id": message.id,
            "message": message.body,
            "level": message.level,
            "channelClass": message.channel_class,
            "metadata": message.metadata,
        });

        let response = self
            .client
            .post(&self.alert_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reason = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| status.to_string());

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LinkError::Auth(reason),
            StatusCode::BAD_REQUEST => LinkError::Rejected(reason),
            _ => LinkError::Transport(format!("router returned {}: {}", status, reason)),
        })
    }

    /// Stateless transport; nothing to keep alive.
    async fn heartbeat(&mut self) -> LinkResult<()> {
        Ok(())
    }

    async fn close(self) {}
}
