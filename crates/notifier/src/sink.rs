//! Destination sinks.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::error::SinkError;
use crate::render::Rendered;

/// Something that can put a rendered notification in front of people.
pub trait Sink: Send + Sync + 'static {
    fn send(&self, destination: &str, rendered: &Rendered) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Posts to chat-style incoming webhooks; the destination is the webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn body(rendered: &Rendered) -> serde_json::Value {
        match rendered {
            Rendered::Rich(card) => json!({ "embeds": [card] }),
            Rendered::Plain(text) => json!({ "content": text }),
        }
    }
}

impl Sink for WebhookSink {
    async fn send(&self, destination: &str, rendered: &Rendered) -> Result<(), SinkError> {
        let response = self
            .client
            .post(destination)
            .json(&Self::body(rendered))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, "Webhook accepted message");
            return Ok(());
        }

        match status {
            StatusCode::NOT_FOUND => Err(SinkError::NotFound(destination.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64);
                Err(SinkError::Throttled { retry_after })
            }
            _ => Err(SinkError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_body_shapes() {
        let rich = WebhookSink::body(&Rendered::Rich(json!({"title": "Alert - Info"})));
        assert_eq!(rich["embeds"][0]["title"], "Alert - Info");

        let plain = WebhookSink::body(&Rendered::Plain("[INFO] hi".to_string()));
        assert_eq!(plain["content"], "[INFO] hi");
    }
}
