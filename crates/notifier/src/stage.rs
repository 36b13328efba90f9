//! Rate-limited delivery stage.
//!
//! Owns the sink, the rate limiter and one FIFO retry queue per destination.
//! Everything is mutated through `&mut self` by the single task that drives
//! the stage, so no locking is involved.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relay_common::config::NotifierConfig;
use relay_common::types::Notification;

use crate::error::SinkError;
use crate::rate_limiter::RateLimiter;
use crate::render;
use crate::routing::ChannelRoutes;
use crate::sink::Sink;

/// Dead letters kept for inspection; older ones are dropped first.
const MAX_DEAD_LETTERS: usize = 1000;

#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Failed sends before a message is dead-lettered.
    pub max_attempts: u32,
    /// Rate-limit deferrals before a message is dead-lettered.
    pub max_deferrals: u32,
    /// Pause between sends while draining.
    pub pacing: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_deferrals: 100,
            pacing: Duration::from_millis(100),
        }
    }
}

impl From<&NotifierConfig> for StageConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            max_deferrals: config.max_deferrals.max(1),
            pacing: config.pacing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    Parked,
    DeadLettered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    SendFailures(u32),
    Deferrals(u32),
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadLetterReason::SendFailures(n) => write!(f, "{} failed sends", n),
            DeadLetterReason::Deferrals(n) => write!(f, "{} rate-limit deferrals", n),
        }
    }
}

/// A message the stage gave up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub notification: Notification,
    pub channel: String,
    pub reason: DeadLetterReason,
    pub last_error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Parked {
    notification: Notification,
    attempts: u32,
    deferrals: u32,
}

impl Parked {
    fn new(notification: Notification) -> Self {
        Self {
            notification,
            attempts: 0,
            deferrals: 0,
        }
    }
}

pub struct DeliveryStage<S> {
    sink: S,
    limiter: RateLimiter,
    routes: ChannelRoutes,
    config: StageConfig,
    ready: bool,
    retry: BTreeMap<String, VecDeque<Parked>>,
    dead_letters: VecDeque<DeadLetter>,
}

impl<S: Sink> DeliveryStage<S> {
    /// A new stage starts not ready; call `set_ready` once the sink can send.
    pub fn new(sink: S, limiter: RateLimiter, routes: ChannelRoutes, config: StageConfig) -> Self {
        Self {
            sink,
            limiter,
            routes,
            config,
            ready: false,
            retry: BTreeMap::new(),
            dead_letters: VecDeque::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Becoming ready drains everything parked so far. Returns messages sent.
    pub async fn set_ready(&mut self, ready: bool) -> usize {
        let became_ready = ready && !self.ready;
        self.ready = ready;
        if became_ready {
            info!(parked = self.parked(), "Delivery stage ready");
            self.drain().await
        } else {
            0
        }
    }

    /// Route a fresh notification and try to send it.
    pub async fn submit(&mut self, notification: Notification) -> SendResult {
        let channel = self.routes.select(&notification.message).to_string();
        self.attempt(Parked::new(notification), channel).await
    }

    /// Try to send `notification` to `channel` right now, parking it on failure.
    pub async fn attempt_send(&mut self, notification: Notification, channel: &str) -> SendResult {
        self.attempt(Parked::new(notification), channel.to_string()).await
    }

    /// One pass over each channel's parked messages. Returns messages sent.
    pub async fn drain(&mut self) -> usize {
        if !self.ready {
            return 0;
        }

        let channels: Vec<String> = self.retry.keys().cloned().collect();
        let mut sent = 0;

        for channel in channels {
            let pending = self.retry.get(&channel).map_or(0, VecDeque::len);
            for _ in 0..pending {
                if !self.ready {
                    break;
                }
                if self.limiter.is_rate_limited(&channel, Instant::now()) {
                    self.defer_head(&channel);
                    break;
                }
                let Some(entry) = self.retry.get_mut(&channel).and_then(VecDeque::pop_front) else {
                    break;
                };
                if self.attempt(entry, channel.clone()).await == SendResult::Sent {
                    sent += 1;
                }
                tokio::time::sleep(self.config.pacing).await;
            }
        }

        self.retry.retain(|_, queue| !queue.is_empty());
        if sent > 0 {
            debug!(sent, parked = self.parked(), "Drain pass finished");
        }
        sent
    }

    /// Messages waiting across all channels.
    pub fn parked(&self) -> usize {
        self.retry.values().map(VecDeque::len).sum()
    }

    pub fn parked_in(&self, channel: &str) -> usize {
        self.retry.get(channel).map_or(0, VecDeque::len)
    }

    pub fn dead_letters(&self) -> impl Iterator<Item = &DeadLetter> {
        self.dead_letters.iter()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.len()
    }

    pub fn routes(&self) -> &ChannelRoutes {
        &self.routes
    }

    async fn attempt(&mut self, mut entry: Parked, channel: String) -> SendResult {
        if !self.ready {
            debug!(id = %entry.notification.message.id, "Stage not ready, parking message");
            self.park(entry, channel);
            return SendResult::Parked;
        }

        if self.limiter.is_rate_limited(&channel, Instant::now()) {
            debug!(id = %entry.notification.message.id, %channel, "Rate limited, parking message");
            return self.defer(entry, channel, None);
        }

        match self.send_with_fallback(&channel, &entry.notification).await {
            Ok(()) => {
                self.limiter.record(&channel, Instant::now());
                info!(
                    id = %entry.notification.message.id,
                    sender = %entry.notification.sender.name,
                    "Notification delivered"
                );
                SendResult::Sent
            }
            Err(SinkError::Throttled { retry_after }) => {
                debug!(?retry_after, %channel, "Destination throttled us");
                self.defer(entry, channel, Some("throttled by destination".to_string()))
            }
            Err(e) => {
                entry.attempts += 1;
                if entry.attempts >= self.config.max_attempts {
                    let reason = DeadLetterReason::SendFailures(entry.attempts);
                    self.dead_letter(entry, channel, reason, Some(e.to_string()));
                    SendResult::DeadLettered
                } else {
                    warn!(
                        id = %entry.notification.message.id,
                        attempts = entry.attempts,
                        error = %e,
                        "Send failed, parking message"
                    );
                    self.park(entry, channel);
                    SendResult::Parked
                }
            }
        }
    }

    async fn send_with_fallback(&self, channel: &str, notification: &Notification) -> Result<(), SinkError> {
        match self.sink.send(channel, &render::rich(notification)).await {
            Ok(()) => Ok(()),
            Err(e @ (SinkError::Throttled { .. } | SinkError::NotFound(_))) => Err(e),
            Err(e) => {
                debug!(error = %e, "Rich send failed, falling back to plain text");
                self.sink.send(channel, &render::plain(notification)).await
            }
        }
    }

    fn defer(&mut self, mut entry: Parked, channel: String, last_error: Option<String>) -> SendResult {
        entry.deferrals += 1;
        if entry.deferrals >= self.config.max_deferrals {
            let reason = DeadLetterReason::Deferrals(entry.deferrals);
            self.dead_letter(entry, channel, reason, last_error);
            SendResult::DeadLettered
        } else {
            self.park(entry, channel);
            SendResult::Parked
        }
    }

    /// Count a deferral against the head of a rate-limited channel without
    /// moving it.
    fn defer_head(&mut self, channel: &str) {
        let Some(queue) = self.retry.get_mut(channel) else {
            return;
        };
        let Some(head) = queue.front_mut() else {
            return;
        };
        head.deferrals += 1;
        if head.deferrals >= self.config.max_deferrals
            && let Some(head) = queue.pop_front()
        {
            let reason = DeadLetterReason::Deferrals(head.deferrals);
            self.dead_letter(head, channel.to_string(), reason, None);
        }
    }

    fn park(&mut self, entry: Parked, channel: String) {
        self.retry.entry(channel).or_default().push_back(entry);
    }

    fn dead_letter(&mut self, entry: Parked, channel: String, reason: DeadLetterReason, last_error: Option<String>) {
        warn!(
            id = %entry.notification.message.id,
            %channel,
            %reason,
            error = last_error.as_deref().unwrap_or(""),
            "Dead-lettering notification"
        );
        if self.dead_letters.len() >= MAX_DEAD_LETTERS {
            self.dead_letters.pop_front();
        }
        self.dead_letters.push_back(DeadLetter {
            notification: entry.notification,
            channel,
            reason,
            last_error,
            at: Utc::now(),
        });
    }
}
