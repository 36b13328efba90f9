//! Connection hub: live connections and the channel groups they belong to.
//!
//! Each connection has an outbound buffer drained by its own writer task.
//! Broadcasts snapshot the target members under the lock and push to them
//! after releasing it; a connection whose buffer is full misses the event.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use relay_common::protocol::ServerEvent;
use relay_common::types::{Notification, PrincipalInfo, WireMessage};

pub type ConnectionId = u64;

/// Named set of connections a broadcast can target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    /// Every connection of one principal.
    Principal(Uuid),
    Producers,
    /// All consumers regardless of type.
    Consumers,
    /// Consumers of one integration type.
    ConsumerType(String),
    /// Observers of notifications and presence.
    Dashboard,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Principal(id) => write!(f, "principal:{}", id),
            Group::Producers => write!(f, "producers"),
            Group::Consumers => write!(f, "consumers"),
            Group::ConsumerType(t) => write!(f, "consumer-type:{}", t),
            Group::Dashboard => write!(f, "dashboard"),
        }
    }
}

struct Member {
    outbound: mpsc::Sender<ServerEvent>,
    principal: Option<PrincipalInfo>,
    groups: HashSet<Group>,
}

#[derive(Default)]
struct HubInner {
    next_id: ConnectionId,
    members: HashMap<ConnectionId, Member>,
    groups: HashMap<Group, HashSet<ConnectionId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    pub authenticated: usize,
    pub groups: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct Hub {
    inner: RwLock<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new, not yet authenticated connection.
    pub async fn register(&self, outbound: mpsc::Sender<ServerEvent>) -> ConnectionId {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.members.insert(
            id,
            Member {
                outbound,
                principal: None,
                groups: HashSet::new(),
            },
        );
        id
    }

    /// Attach the authenticated principal and join `groups`.
    pub async fn authenticate(&self, conn: ConnectionId, principal: PrincipalInfo, groups: Vec<Group>) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(member) = inner.members.get_mut(&conn) else {
            return;
        };
        member.principal = Some(principal);
        member.groups.extend(groups.iter().cloned());
        for group in groups {
            inner.groups.entry(group).or_default().insert(conn);
        }
    }

    pub async fn join(&self, conn: ConnectionId, group: Group) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(member) = inner.members.get_mut(&conn) else {
            return;
        };
        member.groups.insert(group.clone());
        inner.groups.entry(group).or_default().insert(conn);
    }

    /// Forget a connection and its memberships. Returns its principal, if any.
    pub async fn unregister(&self, conn: ConnectionId) -> Option<PrincipalInfo> {
        let mut inner = self.inner.write().await;
        let member = inner.members.remove(&conn)?;
        for group in &member.groups {
            if let Some(members) = inner.groups.get_mut(group) {
                members.remove(&conn);
                if members.is_empty() {
                    inner.groups.remove(group);
                }
            }
        }
        member.principal
    }

    /// Fire-and-forget to every member of `group`. Returns how many accepted it.
    pub async fn broadcast_to_group(&self, group: &Group, event: &ServerEvent) -> usize {
        self.broadcast_to_groups(std::slice::from_ref(group), event).await
    }

    /// Fire-and-forget to the union of `groups`; each connection gets it once.
    pub async fn broadcast_to_groups(&self, groups: &[Group], event: &ServerEvent) -> usize {
        let targets: Vec<(ConnectionId, mpsc::Sender<ServerEvent>)> = {
            let inner = self.inner.read().await;
            let mut seen = HashSet::new();
            groups
                .iter()
                .filter_map(|g| inner.groups.get(g))
                .flat_map(|members| members.iter())
                .filter(|conn| seen.insert(**conn))
                .filter_map(|conn| inner.members.get(conn).map(|m| (*conn, m.outbound.clone())))
                .collect()
        };

        let mut sent = 0;
        for (conn, outbound) in targets {
            match outbound.try_send(event.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection = conn, "Outbound buffer full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection = conn, "Connection already closing, dropping event");
                }
            }
        }
        sent
    }

    pub async fn send_to_principal(&self, id: Uuid, event: &ServerEvent) -> usize {
        self.broadcast_to_group(&Group::Principal(id), event).await
    }

    /// Fan a producer's message out to consumers and dashboard observers.
    pub async fn publish(&self, sender: PrincipalInfo, message: WireMessage) -> usize {
        let id = message.id.clone();
        let event = ServerEvent::Notify(Notification { message, sender });
        let sent = self
            .broadcast_to_groups(&[Group::Consumers, Group::Dashboard], &event)
            .await;
        tracing::info!(message_id = %id, recipients = sent, "Notification fanned out");
        sent
    }

    pub async fn stats(&self) -> HubStats {
        let inner = self.inner.read().await;
        HubStats {
            connections: inner.members.len(),
            authenticated: inner.members.values().filter(|m| m.principal.is_some()).count(),
            groups: inner
                .groups
                .iter()
                .map(|(group, members)| (group.to_string(), members.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::types::{ChannelClass, Level, PrincipalKind};

    fn info(kind: PrincipalKind) -> PrincipalInfo {
        PrincipalInfo {
            id: Uuid::new_v4(),
            name: format!("{}-test", kind),
            kind,
        }
    }

    async fn consumer(hub: &Hub, sink_type: &str) -> (ConnectionId, PrincipalInfo, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = hub.register(tx).await;
        let principal = info(PrincipalKind::Consumer);
        hub.authenticate(
            conn,
            principal.clone(),
            vec![
                Group::Principal(principal.id),
                Group::Consumers,
                Group::ConsumerType(sink_type.to_string()),
            ],
        )
        .await;
        (conn, principal, rx)
    }

    #[test]
    fn test_group_names() {
        let id = Uuid::nil();
        assert_eq!(Group::Principal(id).to_string(), format!("principal:{}", id));
        assert_eq!(Group::ConsumerType("webhook".into()).to_string(), "consumer-type:webhook");
        assert_eq!(Group::Dashboard.to_string(), "dashboard");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_group_members_only() {
        let hub = Hub::new();
        let (_c1, _, mut rx1) = consumer(&hub, "webhook").await;
        let (_c2, _, mut rx2) = consumer(&hub, "discord").await;

        let sent = hub
            .broadcast_to_group(&Group::ConsumerType("webhook".into()), &ServerEvent::error("x"))
            .await;
        assert_eq!(sent, 1);
        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::error("x"));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_union_broadcast_delivers_once() {
        let hub = Hub::new();
        let (conn, _, mut rx) = consumer(&hub, "webhook").await;
        hub.join(conn, Group::Dashboard).await;

        let message = WireMessage::new("deploy done", Level::Success, ChannelClass::Logs);
        let sent = hub.publish(info(PrincipalKind::Producer), message.clone()).await;

        assert_eq!(sent, 1);
        match rx.try_recv().unwrap() {
            ServerEvent::Notify(n) => assert_eq!(n.message, message),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_leaves_all_groups() {
        let hub = Hub::new();
        let (conn, principal, _rx) = consumer(&hub, "webhook").await;
        assert_eq!(hub.stats().await.groups.get("consumers"), Some(&1));

        let removed = hub.unregister(conn).await;
        assert_eq!(removed, Some(principal.clone()));

        let stats = hub.stats().await;
        assert_eq!(stats.connections, 0);
        assert!(stats.groups.is_empty());
        assert_eq!(hub.send_to_principal(principal.id, &ServerEvent::error("gone")).await, 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_event() {
        let hub = Hub::new();
        let (tx, mut rx) = mpsc::channel(1);
        let conn = hub.register(tx).await;
        hub.join(conn, Group::Dashboard).await;

        assert_eq!(hub.broadcast_to_group(&Group::Dashboard, &ServerEvent::error("1")).await, 1);
        assert_eq!(hub.broadcast_to_group(&Group::Dashboard, &ServerEvent::error("2")).await, 0);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::error("1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_sessions_per_principal() {
        let hub = Hub::new();
        let principal = info(PrincipalKind::Producer);
        let mut receivers = Vec::new();
        for _ in 0..2 {
            let (tx, rx) = mpsc::channel(4);
            let conn = hub.register(tx).await;
            hub.authenticate(conn, principal.clone(), vec![Group::Principal(principal.id), Group::Producers])
                .await;
            receivers.push(rx);
        }

        assert_eq!(hub.send_to_principal(principal.id, &ServerEvent::ack("m-1")).await, 2);
        let stats = hub.stats().await;
        assert_eq!(stats.authenticated, 2);
        assert_eq!(stats.groups.get("producers"), Some(&2));
    }
}
