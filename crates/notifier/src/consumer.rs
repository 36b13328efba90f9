//! Router consumer client.
//!
//! Connects to the router as a consumer, feeds inbound notifications to the
//! delivery stage and keeps the session alive with heartbeats. Connectivity
//! failures are retried with bounded exponential backoff; an authentication
//! failure ends the run.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use relay_common::config::{NotifierConfig, backoff_delay};
use relay_common::protocol::{ClientEvent, ConnectRequest, ServerEvent};
use relay_common::types::PrincipalKind;

use crate::error::{ConsumerError, SessionEnd};
use crate::sink::Sink;
use crate::stage::DeliveryStage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub url: String,
    pub token: String,
    pub name: String,
    pub sink_type: String,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl From<&NotifierConfig> for ConsumerConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            url: config.router_url.clone(),
            token: config.token.clone(),
            name: config.name.clone(),
            sink_type: config.sink_type.clone(),
            heartbeat_interval: config.heartbeat_interval,
            connect_timeout: CONNECT_TIMEOUT,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_base_delay: config.reconnect_base_delay,
            reconnect_max_delay: config.reconnect_max_delay,
        }
    }
}

pub struct Consumer<S> {
    config: ConsumerConfig,
    stage: DeliveryStage<S>,
}

impl<S: Sink> Consumer<S> {
    pub fn new(config: ConsumerConfig, stage: DeliveryStage<S>) -> Self {
        Self { config, stage }
    }

    pub fn stage(&self) -> &DeliveryStage<S> {
        &self.stage
    }

    /// Run sessions until authentication fails or reconnects are exhausted.
    pub async fn run(&mut self) -> Result<(), ConsumerError> {
        let mut attempt = 0u32;
        loop {
            match self.session(&mut attempt).await {
                SessionEnd::Auth(reason) => {
                    error!(%reason, "Router refused our credentials");
                    return Err(ConsumerError::Auth(reason));
                }
                end => {
                    attempt += 1;
                    if attempt > self.config.max_reconnect_attempts {
                        error!(attempts = attempt - 1, "Giving up on the router");
                        return Err(ConsumerError::GaveUp(self.config.max_reconnect_attempts));
                    }
                    let delay = backoff_delay(attempt, self.config.reconnect_base_delay, self.config.reconnect_max_delay);
                    warn!(reason = %end, attempt, ?delay, "Router session ended, reconnecting");

                    // Parked messages do not need the router.
                    self.stage.drain().await;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One connected session. Resets `attempt` once authenticated.
    async fn session(&mut self, attempt: &mut u32) -> SessionEnd {
        let mut stream = match self.connect().await {
            Ok(stream) => stream,
            Err(end) => return end,
        };
        *attempt = 0;
        self.stage.drain().await;

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return e.into(),
                },
                _ = heartbeat.tick() => {
                    let frame = match ClientEvent::Heartbeat.to_json() {
                        Ok(frame) => frame,
                        Err(e) => return e.into(),
                    };
                    if let Err(e) = stream.send(Message::Text(frame.into())).await {
                        return e.into();
                    }
                    self.stage.drain().await;
                }
            }
        }
    }

    async fn connect(&self) -> Result<WsStream, SessionEnd> {
        debug!(url = %self.config.url, "Connecting to router");
        let timeout = self.config.connect_timeout;

        let (mut stream, _) = tokio::time::timeout(timeout, connect_async(self.config.url.as_str()))
            .await
            .map_err(|_| SessionEnd::Timeout)?
            .map_err(|e| SessionEnd::Connect(e.to_string()))?;

        let hello = ClientEvent::Connect(ConnectRequest {
            token: self.config.token.clone(),
            kind: PrincipalKind::Consumer,
            name: self.config.name.clone(),
            sink_type: Some(self.config.sink_type.clone()),
        });
        stream.send(Message::Text(hello.to_json()?.into())).await?;

        let reply = tokio::time::timeout(timeout, next_server_event(&mut stream))
            .await
            .map_err(|_| SessionEnd::Timeout)??;

        match reply {
            ServerEvent::Authenticated(principal) => {
                info!(principal = %principal.name, sink_type = %self.config.sink_type, "Connected to router");
                Ok(stream)
            }
            ServerEvent::Error(err) => Err(SessionEnd::Auth(err.reason)),
            other => Err(SessionEnd::Connect(format!("unexpected reply to connect: {:?}", other))),
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        match ServerEvent::from_json(text) {
            Ok(ServerEvent::Notify(notification)) => {
                debug!(id = %notification.message.id, sender = %notification.sender.name, "Received notification");
                self.stage.submit(notification).await;
                self.stage.drain().await;
            }
            Ok(ServerEvent::Error(err)) => warn!(reason = %err.reason, "Router reported an error"),
            Ok(other) => debug!(event = ?other, "Ignoring router event"),
            Err(e) => warn!(error = %e, "Failed to parse router event"),
        }
    }
}

async fn next_server_event(stream: &mut WsStream) -> Result<ServerEvent, SessionEnd> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match ServerEvent::from_json(&text) {
                Ok(event) => return Ok(event),
                Err(e) => warn!(error = %e, "Failed to parse router event"),
            },
            Message::Close(_) => return Err(SessionEnd::Closed),
            _ => {}
        }
    }
    Err(SessionEnd::Closed)
}
