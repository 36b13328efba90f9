//! Persistent WebSocket link.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use relay_common::protocol::{ClientEvent, ConnectRequest, ServerEvent};
use relay_common::types::{PrincipalInfo, PrincipalKind, WireMessage};

use super::{RouterConnector, RouterLink};
use crate::error::{LinkError, LinkResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the router's `/ws` endpoint as a producer.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    token: String,
    name: String,
    timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, token: impl Into<String>, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            name: name.into(),
            timeout,
        }
    }
}

impl RouterConnector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> LinkResult<WsLink> {
        debug!(url = %self.url, "Connecting to router");

        let (mut stream, _) = tokio::time::timeout(self.timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| LinkError::Timeout)?
            .map_err(|e| LinkError::Connect(e.to_string()))?;

        let hello = ClientEvent::Connect(ConnectRequest {
            token: self.token.clone(),
            kind: PrincipalKind::Producer,
            name: self.name.clone(),
            sink_type: None,
        });
        stream.send(Message::Text(hello.to_json()?.into())).await?;

        let reply = tokio::time::timeout(self.timeout, next_server_event(&mut stream))
            .await
            .map_err(|_| LinkError::Timeout)??;

        match reply {
            ServerEvent::Authenticated(principal) => {
                debug!(principal = %principal.name, "Authenticated with router");
                Ok(WsLink {
                    stream,
                    principal,
                    timeout: self.timeout,
                })
            }
            ServerEvent::Error(err) => Err(LinkError::Auth(err.reason)),
            other => Err(LinkError::Transport(format!(
                "unexpected reply to connect: {:?}",
                other
            ))),
        }
    }
}

/// Authenticated WebSocket session with the router.
pub struct WsLink {
    stream: WsStream,
    principal: PrincipalInfo,
    timeout: Duration,
}

impl RouterLink for WsLink {
    async fn deliver(&mut self, message: &WireMessage) -> LinkResult<()> {
        let frame = ClientEvent::Notify(message.clone()).to_json()?;
        self.stream.send(Message::Text(frame.into())).await?;

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.await_ack(&message.id))
            .await
            .map_err(|_| LinkError::Timeout)?
    }

    async fn heartbeat(&mut self) -> LinkResult<()> {
        let frame = ClientEvent::Heartbeat.to_json()?;
        tokio::time::timeout(self.timeout, self.stream.send(Message::Text(frame.into())))
            .await
            .map_err(|_| LinkError::Timeout)??;
        Ok(())
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "Error while closing router link");
        }
    }
}

impl WsLink {
    /// Who the router authenticated us as.
    pub fn principal(&self) -> &PrincipalInfo {
        &self.principal
    }

    async fn await_ack(&mut self, id: &str) -> LinkResult<()> {
        loop {
            match next_server_event(&mut self.stream).await? {
                ServerEvent::Ack(ack) if ack.id == id => return Ok(()),
                ServerEvent::Ack(ack) => {
                    debug!(id = %ack.id, "Ignoring ack for another message");
                }
                ServerEvent::Error(err) => return Err(LinkError::Rejected(err.reason)),
                other => {
                    debug!(event = ?other, "Ignoring router event while awaiting ack");
                }
            }
        }
    }
}

/// Read frames until a parseable server event arrives.
async fn next_server_event(stream: &mut WsStream) -> LinkResult<ServerEvent> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match ServerEvent::from_json(&text) {
                Ok(event) => return Ok(event),
                Err(e) => warn!(error = %e, "Failed to parse router event"),
            },
            Message::Close(_) => return Err(LinkError::Closed),
            _ => {}
        }
    }
    Err(LinkError::Closed)
}
