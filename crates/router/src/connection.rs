//! One WebSocket connection: `AwaitingAuth → Authenticated → Closed`.
//!
//! The reader (this task) owns the connection state. A separate writer task
//! drains the outbound buffer into the socket; once every sender is gone it
//! closes the socket.

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relay_common::error::AppError;
use relay_common::protocol::{ClientEvent, ConnectRequest, ServerEvent};
use relay_common::types::{PresenceStatus, PresenceUpdate, Principal, PrincipalInfo, PrincipalKind, WireMessage};

use crate::hub::{ConnectionId, Group};
use crate::middleware::auth::authenticate_token;
use crate::state::AppState;

enum ConnState {
    AwaitingAuth { deadline: Instant },
    Authenticated(Principal),
}

/// Whether the connection should stay open after handling an event.
enum Flow {
    Continue,
    Close,
}

struct Connection {
    id: ConnectionId,
    state: AppState,
    outbound: mpsc::Sender<ServerEvent>,
    conn_state: ConnState,
}

/// Drive a freshly upgraded socket until it closes.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer);

    let id = state.hub.register(outbound.clone()).await;
    debug!(connection = id, "Connection opened");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = id, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let mut conn = Connection {
        id,
        conn_state: ConnState::AwaitingAuth {
            deadline: Instant::now() + state.config.auth_timeout,
        },
        state,
        outbound,
    };

    loop {
        let deadline = match conn.conn_state {
            ConnState::AwaitingAuth { deadline } => Some(deadline),
            ConnState::Authenticated(_) => None,
        };

        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = sleep_until_opt(deadline) => {
                info!(connection = id, "Authentication timeout");
                conn.reply(ServerEvent::error("Authentication timeout")).await;
                break;
            }
        };

        let flow = match frame {
            Some(Ok(Message::Text(text))) => conn.handle_text(&text).await,
            Some(Ok(Message::Close(_))) | None => Flow::Close,
            Some(Ok(_)) => Flow::Continue,
            Some(Err(e)) => {
                debug!(connection = id, error = %e, "Socket error");
                Flow::Close
            }
        };

        if let Flow::Close = flow {
            break;
        }
    }

    conn.close().await;
    // The writer finishes once the hub and this task dropped their senders.
    drop(conn);
    let _ = writer.await;
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

impl Connection {
    async fn reply(&self, event: ServerEvent) -> bool {
        self.outbound.send(event).await.is_ok()
    }

    async fn handle_text(&mut self, text: &str) -> Flow {
        let event = match ClientEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(connection = self.id, error = %e, "Malformed event");
                return self.flow_after(ServerEvent::error(format!("Malformed event: {}", e))).await;
            }
        };

        let principal = match &self.conn_state {
            ConnState::Authenticated(principal) => principal.clone(),
            ConnState::AwaitingAuth { .. } => {
                return match event {
                    ClientEvent::Connect(request) => self.authenticate(request).await,
                    _ => self.flow_after(ServerEvent::error("Not authenticated")).await,
                };
            }
        };

        match event {
            ClientEvent::Connect(_) => self.flow_after(ServerEvent::error("Already authenticated")).await,
            ClientEvent::Notify(message) => self.notify(principal.info(), message).await,
            ClientEvent::Heartbeat => {
                self.touch(principal.id).await;
                Flow::Continue
            }
            ClientEvent::Observe => {
                debug!(connection = self.id, principal = %principal.display_name, "Joined dashboard");
                self.state.hub.join(self.id, Group::Dashboard).await;
                Flow::Continue
            }
        }
    }

    /// Send an event to this connection and keep it open if that worked.
    async fn flow_after(&self, event: ServerEvent) -> Flow {
        if self.reply(event).await {
            Flow::Continue
        } else {
            Flow::Close
        }
    }

    async fn authenticate(&mut self, request: ConnectRequest) -> Flow {
        let principal = match authenticate_token(&self.state.directory, &request.token).await {
            Ok(principal) => principal,
            Err(e) => {
                let reason = match e {
                    AppError::Forbidden(reason) | AppError::Auth(reason) => reason,
                    other => {
                        warn!(connection = self.id, error = %other, "Directory lookup failed");
                        "Authentication unavailable".to_string()
                    }
                };
                info!(connection = self.id, reason = %reason, "Authentication failed");
                self.reply(ServerEvent::error(reason)).await;
                return Flow::Close;
            }
        };

        if principal.kind != request.kind {
            info!(
                connection = self.id,
                declared = %request.kind,
                actual = %principal.kind,
                "Declared kind does not match token"
            );
            self.reply(ServerEvent::error(format!("Token is not registered as a {}", request.kind)))
                .await;
            return Flow::Close;
        }

        let info = principal.info();
        let groups = groups_for(&info, request.sink_type.as_deref());
        self.state.hub.authenticate(self.id, info.clone(), groups).await;

        info!(
            connection = self.id,
            principal_id = %info.id,
            principal = %info.name,
            client_name = %request.name,
            kind = %info.kind,
            "Authenticated"
        );

        let sent = self.reply(ServerEvent::Authenticated(info.clone())).await;
        self.touch(info.id).await;
        self.presence(info, PresenceStatus::Online).await;
        self.conn_state = ConnState::Authenticated(principal);

        if sent { Flow::Continue } else { Flow::Close }
    }

    async fn notify(&self, sender: PrincipalInfo, message: WireMessage) -> Flow {
        if sender.kind != PrincipalKind::Producer {
            return self
                .flow_after(ServerEvent::error("Only producers can send notifications"))
                .await;
        }
        if let Err(e) = message.validate() {
            return self.flow_after(ServerEvent::error(e.to_string())).await;
        }

        let id = message.id.clone();
        let sender_id = sender.id;
        self.state.hub.publish(sender, message).await;
        self.touch(sender_id).await;
        self.flow_after(ServerEvent::ack(id)).await
    }

    async fn touch(&self, id: uuid::Uuid) {
        if let Err(e) = self.state.directory.touch_last_seen(id).await {
            warn!(principal_id = %id, error = %e, "Failed to update last seen");
        }
    }

    async fn presence(&self, principal: PrincipalInfo, status: PresenceStatus) {
        let event = ServerEvent::Presence(PresenceUpdate {
            principal,
            status,
            at: Utc::now(),
        });
        self.state.hub.broadcast_to_group(&Group::Dashboard, &event).await;
    }

    async fn close(&mut self) {
        if let Some(info) = self.state.hub.unregister(self.id).await {
            info!(connection = self.id, principal = %info.name, "Disconnected");
            self.presence(info, PresenceStatus::Offline).await;
        } else {
            debug!(connection = self.id, "Connection closed before authenticating");
        }
    }
}

/// Groups an authenticated principal joins.
pub fn groups_for(principal: &PrincipalInfo, sink_type: Option<&str>) -> Vec<Group> {
    let mut groups = vec![Group::Principal(principal.id)];
    match principal.kind {
        PrincipalKind::Producer => groups.push(Group::Producers),
        PrincipalKind::Consumer => {
            groups.push(Group::Consumers);
            if let Some(sink_type) = sink_type.map(str::trim).filter(|t| !t.is_empty()) {
                groups.push(Group::ConsumerType(sink_type.to_string()));
            }
        }
    }
    groups
}
