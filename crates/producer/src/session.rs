//! Delivery session: the producer's connection state machine.
//!
//! ```text
//! Offline ──connect──▶ Connecting ──ok──▶ Online ◀──▶ Draining
//!    ▲                     │                 │
//!    └────────fail─────────┘◀──link failure──┘
//! ```
//!
//! One task owns the queue and the router link. Everything else talks to it
//! through a `SessionHandle`, so queue mutations never interleave.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use relay_common::config::{ProducerConfig, backoff_delay};
use relay_common::types::WireMessage;

use crate::error::{LinkError, QueueError, QueueResult, SessionError};
use crate::queue::{DurableQueue, StorageMode};
use crate::transport::{RouterConnector, RouterLink};

/// Messages moved out of the queue per drain pass.
pub const DRAIN_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Queue messages while the router is unreachable
    pub offline_queue: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub heartbeat_interval: Duration,
    pub drain_batch_size: usize,
    /// Delay before the next pass when a drain left messages behind
    pub drain_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            offline_queue: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            drain_batch_size: DRAIN_BATCH_SIZE,
            drain_interval: Duration::from_secs(1),
        }
    }
}

impl From<&ProducerConfig> for SessionConfig {
    fn from(config: &ProducerConfig) -> Self {
        Self {
            offline_queue: config.offline_queue,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_base_delay: config.reconnect_base_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            heartbeat_interval: config.heartbeat_interval,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Offline,
    Connecting,
    Online,
    Draining,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Offline => write!(f, "offline"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Online => write!(f, "online"),
            SessionState::Draining => write!(f, "draining"),
        }
    }
}

/// What happened to a message handed to `SessionHandle::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The router confirmed it.
    Delivered,
    /// Parked in the local queue; `durable` is false while storage is degraded.
    Queued { durable: bool },
    /// Invalid message, or refused by the router. Never retried.
    Rejected(String),
    /// Neither delivered nor queued.
    Failed(String),
}

enum Command {
    Send {
        message: WireMessage,
        reply: oneshot::Sender<SendOutcome>,
    },
    Reconnect,
    Pending {
        reply: oneshot::Sender<Vec<WireMessage>>,
    },
    ClearQueue {
        reply: oneshot::Sender<QueueResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a running `DeliverySession`.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub async fn send(&self, message: WireMessage) -> SendOutcome {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Send { message, reply }).await.is_err() {
            return SendOutcome::Failed(SessionError::Closed.to_string());
        }
        rx.await
            .unwrap_or_else(|_| SendOutcome::Failed(SessionError::Closed.to_string()))
    }

    /// Reset the backoff and connect now if offline.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.commands
            .send(Command::Reconnect)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Snapshot of the undelivered messages, oldest first.
    pub async fn pending(&self) -> Result<Vec<WireMessage>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Pending { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn clear_queue(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ClearQueue { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Close the link and stop the session task. Queued messages stay on disk.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Pends forever when no deadline is set.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

pub struct DeliverySession<C: RouterConnector> {
    connector: C,
    queue: DurableQueue,
    config: SessionConfig,
    link: Option<C::Link>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    reconnect_attempt: u32,
    /// Set by an authentication failure; cleared only by an explicit reconnect.
    auth_failed: bool,
    reconnect_at: Option<Instant>,
    drain_at: Option<Instant>,
    heartbeat_at: Option<Instant>,
}

impl<C: RouterConnector> DeliverySession<C> {
    pub fn new(connector: C, queue: DurableQueue, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Offline);
        Self {
            connector,
            queue,
            config,
            link: None,
            state: SessionState::Offline,
            state_tx,
            reconnect_attempt: 0,
            auth_failed: false,
            reconnect_at: None,
            drain_at: None,
            heartbeat_at: None,
        }
    }

    /// Start the session task and connect right away.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(64);
        let handle = SessionHandle {
            commands,
            state: self.state_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(queued = self.queue.len(), "Delivery session started");
        self.connect().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.close().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.close().await;
                        break;
                    }
                },
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                _ = sleep_until_opt(self.drain_at) => {
                    self.drain_at = None;
                    self.drain().await;
                }
                _ = sleep_until_opt(self.heartbeat_at) => {
                    self.heartbeat().await;
                }
            }
        }

        info!(queued = self.queue.len(), "Delivery session stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { message, reply } => {
                let outcome = self.send(message).await;
                let _ = reply.send(outcome);
            }
            Command::Reconnect => {
                self.reconnect_attempt = 0;
                self.auth_failed = false;
                if self.state == SessionState::Offline {
                    self.reconnect_at = None;
                    self.connect().await;
                }
            }
            Command::Pending { reply } => {
                let _ = reply.send(self.queue.peek_all());
            }
            Command::ClearQueue { reply } => {
                let result = match self.queue.clear().await {
                    Err(QueueError::StorageUnavailable(_)) => self.queue.clear().await,
                    other => other,
                };
                let _ = reply.send(result);
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Session state change");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    async fn connect(&mut self) {
        self.set_state(SessionState::Connecting);

        match self.connector.connect().await {
            Ok(link) => {
                info!(queued = self.queue.len(), "Connected to router");
                self.link = Some(link);
                self.reconnect_attempt = 0;
                self.auth_failed = false;
                self.heartbeat_at = Some(Instant::now() + self.config.heartbeat_interval);
                self.set_state(SessionState::Online);
                self.drain().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to router");
                self.go_offline(&e);
            }
        }
    }

    /// Drop the link and schedule a reconnect unless that is pointless.
    fn go_offline(&mut self, reason: &LinkError) {
        self.link = None;
        self.heartbeat_at = None;
        self.drain_at = None;
        self.set_state(SessionState::Offline);

        if let LinkError::Auth(msg) = reason {
            error!(reason = %msg, "Router refused our credentials, not reconnecting automatically");
            self.auth_failed = true;
            self.reconnect_at = None;
            return;
        }
        if self.auth_failed {
            return;
        }

        self.reconnect_attempt += 1;
        if self.reconnect_attempt > self.config.max_reconnect_attempts {
            warn!(
                attempts = self.config.max_reconnect_attempts,
                queued = self.queue.len(),
                "Giving up on reconnecting until asked to"
            );
            self.reconnect_at = None;
            return;
        }

        let delay = backoff_delay(
            self.reconnect_attempt,
            self.config.reconnect_base_delay,
            self.config.reconnect_max_delay,
        );
        info!(
            attempt = self.reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        self.heartbeat_at = None;
        self.drain_at = None;
        self.reconnect_at = None;
        self.set_state(SessionState::Offline);
    }

    async fn send(&mut self, mut message: WireMessage) -> SendOutcome {
        if let Err(e) = message.validate() {
            return SendOutcome::Rejected(e.to_string());
        }

        // Anything already queued goes first.
        if self.state == SessionState::Online
            && self.queue.is_empty()
            && let Some(link) = self.link.as_mut()
        {
            match link.deliver(&message).await {
                Ok(()) => {
                    debug!(id = %message.id, "Message delivered");
                    return SendOutcome::Delivered;
                }
                Err(LinkError::Rejected(reason)) => {
                    warn!(id = %message.id, reason = %reason, "Router rejected message");
                    return SendOutcome::Rejected(reason);
                }
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Delivery failed, queueing message");
                    message.attempt = message.attempt.saturating_add(1);
                    self.go_offline(&e);
                }
            }
        }

        let outcome = self.enqueue(message).await;
        if self.state == SessionState::Online && self.drain_at.is_none() {
            self.drain_at = Some(Instant::now());
        }
        outcome
    }

    async fn enqueue(&mut self, message: WireMessage) -> SendOutcome {
        if !self.config.offline_queue {
            return SendOutcome::Failed("router unavailable and offline queue is disabled".to_string());
        }

        let id = message.id.clone();
        let result = match self.queue.enqueue(message.clone()).await {
            Err(QueueError::StorageUnavailable(_)) => self.queue.enqueue(message).await,
            other => other,
        };

        match result {
            Ok(queued) => {
                let durable = self.queue.storage_mode() == StorageMode::Durable;
                info!(id = %id, queued, durable, "Message queued for later delivery");
                SendOutcome::Queued { durable }
            }
            Err(e) => {
                error!(id = %id, error = %e, "Failed to queue message");
                SendOutcome::Failed(e.to_string())
            }
        }
    }

    async fn drain(&mut self) {
        if self.state != SessionState::Online || self.queue.is_empty() {
            return;
        }

        self.set_state(SessionState::Draining);
        let result = self.drain_pass().await;

        match result {
            Err(e) if e.is_connectivity() || matches!(e, LinkError::Auth(_)) => {
                warn!(error = %e, queued = self.queue.len(), "Drain interrupted");
                self.go_offline(&e);
            }
            other => {
                if let Err(e) = other {
                    warn!(error = %e, "Queued message refused, will retry");
                }
                self.set_state(SessionState::Online);
                if !self.queue.is_empty() {
                    self.drain_at = Some(Instant::now() + self.config.drain_interval);
                }
            }
        }
    }

    /// Deliver one batch. On the first failure the failed message and the rest
    /// of the batch go back to the head and the failed one is marked.
    async fn drain_pass(&mut self) -> Result<(), LinkError> {
        let batch = match self.queue.dequeue_batch(self.config.drain_batch_size).await {
            Ok(batch) => batch,
            Err(QueueError::StorageUnavailable(_)) => {
                match self.queue.dequeue_batch(self.config.drain_batch_size).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, "Failed to read queue for draining");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read queue for draining");
                return Ok(());
            }
        };

        let total = batch.len();
        debug!(batch = total, "Draining queued messages");

        let mut remaining = batch.into_iter();
        let mut delivered = 0usize;
        while let Some(message) = remaining.next() {
            let Some(link) = self.link.as_mut() else {
                let mut undelivered = vec![message];
                undelivered.extend(remaining);
                self.restore(undelivered).await;
                return Err(LinkError::Closed);
            };

            match link.deliver(&message).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(id = %message.id, attempt = message.attempt, "Queued message delivered");
                }
                Err(e) => {
                    let id = message.id.clone();
                    let mut undelivered = vec![message];
                    undelivered.extend(remaining);
                    self.restore(undelivered).await;
                    self.mark_failed(&id).await;
                    info!(delivered, total, "Drain pass stopped early");
                    return Err(e);
                }
            }
        }

        info!(delivered, queued = self.queue.len(), "Drain pass complete");
        Ok(())
    }

    async fn restore(&mut self, messages: Vec<WireMessage>) {
        let result = match self.queue.restore_front(messages.clone()).await {
            Err(QueueError::StorageUnavailable(_)) => self.queue.restore_front(messages).await,
            other => other,
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to put undelivered messages back in the queue");
        }
    }

    async fn mark_failed(&mut self, id: &str) {
        let result = match self.queue.mark_failed(id).await {
            Err(QueueError::StorageUnavailable(_)) => self.queue.mark_failed(id).await,
            other => other,
        };
        if let Err(e) = result {
            error!(id = %id, error = %e, "Failed to record delivery failure");
        }
    }

    async fn heartbeat(&mut self) {
        let Some(link) = self.link.as_mut() else {
            self.heartbeat_at = None;
            return;
        };

        match link.heartbeat().await {
            Ok(()) => {
                self.heartbeat_at = Some(Instant::now() + self.config.heartbeat_interval);
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat failed");
                self.go_offline(&e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkResult;
    use relay_common::types::{ChannelClass, Level};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RouterState {
        online: bool,
        reject_auth: bool,
        connects: u32,
        heartbeats: u32,
        delivered: Vec<WireMessage>,
        fail_once: HashSet<String>,
        reject: HashSet<String>,
    }

    #[derive(Clone, Default)]
    struct MockRouter(Arc<Mutex<RouterState>>);

    impl MockRouter {
        fn online() -> Self {
            let router = Self::default();
            router.set_online(true);
            router
        }

        fn set_online(&self, online: bool) {
            self.0.lock().unwrap().online = online;
        }

        fn delivered_bodies(&self) -> Vec<String> {
            self.0.lock().unwrap().delivered.iter().map(|m| m.body.clone()).collect()
        }

        fn connects(&self) -> u32 {
            self.0.lock().unwrap().connects
        }
    }

    struct MockLink(MockRouter);

    impl RouterConnector for MockRouter {
        type Link = MockLink;

        async fn connect(&self) -> LinkResult<MockLink> {
            let mut state = self.0.lock().unwrap();
            state.connects += 1;
            if state.reject_auth {
                return Err(LinkError::Auth("Invalid token".to_string()));
            }
            if !state.online {
                return Err(LinkError::Connect("connection refused".to_string()));
            }
            Ok(MockLink(self.clone()))
        }
    }

    impl RouterLink for MockLink {
        async fn deliver(&mut self, message: &WireMessage) -> LinkResult<()> {
            let mut state = self.0.0.lock().unwrap();
            if !state.online {
                return Err(LinkError::Closed);
            }
            if state.reject.contains(&message.body) {
                return Err(LinkError::Rejected("invalid".to_string()));
            }
            if state.fail_once.remove(&message.body) {
                return Err(LinkError::Transport("connection reset".to_string()));
            }
            state.delivered.push(message.clone());
            Ok(())
        }

        async fn heartbeat(&mut self) -> LinkResult<()> {
            let mut state = self.0.0.lock().unwrap();
            if !state.online {
                return Err(LinkError::Closed);
            }
            state.heartbeats += 1;
            Ok(())
        }

        async fn close(self) {}
    }

    fn msg(body: &str) -> WireMessage {
        WireMessage::new(body, Level::Info, ChannelClass::Alerts)
    }

    async fn start(router: &MockRouter, config: SessionConfig) -> (SessionHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), 10).await.unwrap();
        let (handle, _task) = DeliverySession::new(router.clone(), queue, config).spawn();
        (handle, dir)
    }

    async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
        let mut rx = handle.watch_state();
        tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    async fn wait_until_drained(handle: &SessionHandle) {
        for _ in 0..200 {
            if handle.pending().await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_send_is_delivered_directly() {
        let router = MockRouter::online();
        let (handle, _dir) = start(&router, SessionConfig::default()).await;
        wait_for_state(&handle, SessionState::Online).await;

        assert_eq!(handle.send(msg("hello")).await, SendOutcome::Delivered);
        assert_eq!(router.delivered_bodies(), vec!["hello"]);
        assert!(handle.pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_message_is_rejected_not_queued() {
        let router = MockRouter::default();
        let (handle, _dir) = start(&router, SessionConfig::default()).await;

        let outcome = handle.send(msg("   ")).await;
        assert!(matches!(outcome, SendOutcome::Rejected(_)));
        assert!(handle.pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_messages_are_delivered_once_after_reconnect() {
        let router = MockRouter::default();
        let (handle, _dir) = start(&router, SessionConfig::default()).await;
        wait_for_state(&handle, SessionState::Offline).await;

        assert_eq!(handle.send(msg("queued")).await, SendOutcome::Queued { durable: true });
        assert_eq!(handle.pending().await.unwrap().len(), 1);

        router.set_online(true);
        wait_until_drained(&handle).await;

        assert_eq!(router.delivered_bodies(), vec!["queued"]);
        assert_eq!(handle.state(), SessionState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abc_with_one_transient_failure() {
        let router = MockRouter::default();
        router.0.lock().unwrap().fail_once.insert("B".to_string());
        let (handle, _dir) = start(&router, SessionConfig::default()).await;
        wait_for_state(&handle, SessionState::Offline).await;

        for body in ["A", "B", "C"] {
            assert!(matches!(handle.send(msg(body)).await, SendOutcome::Queued { .. }));
        }

        router.set_online(true);
        handle.reconnect().await.unwrap();
        wait_until_drained(&handle).await;

        let delivered = router.delivered_bodies();
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[0], "A");
        assert!(delivered.contains(&"B".to_string()));
        assert!(delivered.contains(&"C".to_string()));

        let b = router.0.lock().unwrap().delivered.iter().find(|m| m.body == "B").cloned().unwrap();
        assert_eq!(b.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_send_failure_queues_with_attempt() {
        let router = MockRouter::online();
        let (handle, _dir) = start(&router, SessionConfig::default()).await;
        wait_for_state(&handle, SessionState::Online).await;

        router.set_online(false);
        let message = msg("lost link");
        let id = message.id.clone();
        assert!(matches!(handle.send(message).await, SendOutcome::Queued { .. }));

        let pending = handle.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].attempt, 1);
        assert_eq!(handle.state(), SessionState::Offline);

        router.set_online(true);
        wait_until_drained(&handle).await;
        assert_eq!(router.delivered_bodies(), vec!["lost link"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_rejection_is_not_queued() {
        let router = MockRouter::online();
        router.0.lock().unwrap().reject.insert("bad".to_string());
        let (handle, _dir) = start(&router, SessionConfig::default()).await;
        wait_for_state(&handle, SessionState::Online).await;

        assert!(matches!(handle.send(msg("bad")).await, SendOutcome::Rejected(_)));
        assert!(handle.pending().await.unwrap().is_empty());
        assert_eq!(handle.state(), SessionState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_queue_disabled_fails_messages() {
        let router = MockRouter::default();
        let config = SessionConfig {
            offline_queue: false,
            ..SessionConfig::default()
        };
        let (handle, _dir) = start(&router, config).await;
        wait_for_state(&handle, SessionState::Offline).await;

        assert!(matches!(handle.send(msg("nowhere")).await, SendOutcome::Failed(_)));
        assert!(handle.pending().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let router = MockRouter::default();
        let config = SessionConfig {
            max_reconnect_attempts: 3,
            ..SessionConfig::default()
        };
        let (handle, _dir) = start(&router, config).await;

        // 1 + 2 + 4 seconds of backoff, then nothing more.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(router.connects(), 4);
        assert_eq!(handle.state(), SessionState::Offline);

        router.set_online(true);
        handle.reconnect().await.unwrap();
        wait_for_state(&handle, SessionState::Online).await;
        assert_eq!(router.connects(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let router = MockRouter::online();
        router.0.lock().unwrap().reject_auth = true;
        let (handle, _dir) = start(&router, SessionConfig::default()).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(router.connects(), 1);
        assert_eq!(handle.state(), SessionState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failure_triggers_reconnect() {
        let router = MockRouter::online();
        let config = SessionConfig {
            heartbeat_interval: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let (handle, _dir) = start(&router, config).await;
        wait_for_state(&handle, SessionState::Online).await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(router.0.lock().unwrap().heartbeats >= 2);

        router.set_online(false);
        wait_for_state(&handle, SessionState::Offline).await;

        router.set_online(true);
        wait_for_state(&handle, SessionState::Online).await;
        assert!(router.connects() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_queue_on_disk() {
        let router = MockRouter::default();
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), 10).await.unwrap();
        let (handle, task) = DeliverySession::new(router.clone(), queue, SessionConfig::default()).spawn();

        handle.send(msg("later")).await;
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let reopened = DurableQueue::open(dir.path(), 10).await.unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(matches!(handle.send(msg("x")).await, SendOutcome::Failed(_)));
    }
}
