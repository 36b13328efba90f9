//! Local durable queue: bounded, disk-backed FIFO of undelivered messages.
//!
//! The whole queue is mirrored to a single JSON file (`messages.json`, an
//! array of `WireMessage`). Every mutation is applied to a copy, written to a
//! temporary file and renamed into place; the in-memory state only changes once
//! that write succeeded.
//!
//! When the disk cannot be written the failing operation is reported and the
//! queue drops to memory-only mode. Later mutations keep working in memory and
//! each one tries to re-persist the full state; the first success makes the
//! queue durable again.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use relay_common::types::WireMessage;

use crate::error::{QueueError, QueueResult};

/// File name of the queue inside its directory.
pub const QUEUE_FILE: &str = "messages.json";

/// Default capacity.
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Failed attempts after which a message is moved behind everything else.
pub const REQUEUE_AFTER_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Memory and disk agree.
    Durable,
    /// The last write failed; memory is ahead of disk.
    MemoryOnly,
}

/// Bounded FIFO of `WireMessage` mirrored to disk.
///
/// Mutating methods take `&mut self`: one owner, one writer.
#[derive(Debug)]
pub struct DurableQueue {
    path: PathBuf,
    max_size: usize,
    entries: VecDeque<WireMessage>,
    mode: StorageMode,
}

impl DurableQueue {
    /// Open (or create) the queue stored in `dir`.
    ///
    /// A missing file yields an empty queue. A file that cannot be parsed is
    /// moved aside to `messages.json.corrupt` and the queue starts empty.
    pub async fn open(dir: impl AsRef<Path>, max_size: usize) -> QueueResult<Self> {
        if max_size == 0 {
            return Err(QueueError::InvalidCapacity);
        }

        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(QUEUE_FILE);

        let mut entries = Self::load(&path).await?;
        if entries.len() > max_size {
            let excess = entries.len() - max_size;
            entries.drain(..excess);
            tracing::warn!(
                dropped = excess,
                max_size,
                "Stored queue exceeds capacity, dropping oldest messages"
            );
        }

        tracing::debug!(path = %path.display(), queued = entries.len(), "Opened durable queue");

        Ok(Self {
            path,
            max_size,
            entries,
            mode: StorageMode::Durable,
        })
    }

    async fn load(path: &Path) -> QueueResult<VecDeque<WireMessage>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(VecDeque::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Vec<WireMessage>>(&bytes) {
            Ok(messages) => Ok(messages.into()),
            Err(e) => {
                let aside = path.with_extension("json.corrupt");
                tracing::warn!(
                    error = %e,
                    moved_to = %aside.display(),
                    "Queue file is unreadable, starting with an empty queue"
                );
                tokio::fs::rename(path, &aside).await?;
                Ok(VecDeque::new())
            }
        }
    }

    /// Append a message, evicting the oldest entry first when full.
    ///
    /// Returns the queue length after the append.
    pub async fn enqueue(&mut self, message: WireMessage) -> QueueResult<usize> {
        let mut next = self.entries.clone();
        if next.len() >= self.max_size
            && let Some(evicted) = next.pop_front()
        {
            tracing::warn!(
                evicted_id = %evicted.id,
                max_size = self.max_size,
                "Queue full, evicting oldest message"
            );
        }
        let id = message.id.clone();
        next.push_back(message);

        self.commit(next).await?;
        tracing::debug!(id = %id, queued = self.entries.len(), "Message enqueued");
        Ok(self.entries.len())
    }

    /// Remove and return up to `n` of the oldest messages, in order.
    pub async fn dequeue_batch(&mut self, n: usize) -> QueueResult<Vec<WireMessage>> {
        if n == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut next = self.entries.clone();
        let take = n.min(next.len());
        let batch: Vec<WireMessage> = next.drain(..take).collect();

        self.commit(next).await?;
        Ok(batch)
    }

    /// Put undelivered messages back at the head, keeping their order.
    pub async fn restore_front(&mut self, messages: Vec<WireMessage>) -> QueueResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut next = self.entries.clone();
        for message in messages.into_iter().rev() {
            next.push_front(message);
        }
        while next.len() > self.max_size {
            if let Some(evicted) = next.pop_front() {
                tracing::warn!(evicted_id = %evicted.id, "Queue over capacity on restore, evicting oldest");
            }
        }

        self.commit(next).await
    }

    /// Record a failed delivery for `id`.
    ///
    /// Once a message has failed `REQUEUE_AFTER_ATTEMPTS` times it is moved to
    /// the tail instead of being dropped. Returns `false` if `id` is not queued.
    pub async fn mark_failed(&mut self, id: &str) -> QueueResult<bool> {
        let Some(position) = self.entries.iter().position(|m| m.id == id) else {
            return Ok(false);
        };

        let mut next = self.entries.clone();
        let relocate = {
            let message = &mut next[position];
            message.attempt = message.attempt.saturating_add(1);
            message.attempt >= REQUEUE_AFTER_ATTEMPTS
        };
        if relocate
            && position + 1 < next.len()
            && let Some(message) = next.remove(position)
        {
            tracing::warn!(
                id = %message.id,
                attempt = message.attempt,
                "Message keeps failing, moving it to the back of the queue"
            );
            next.push_back(message);
        }

        self.commit(next).await?;
        Ok(true)
    }

    /// Drop every queued message.
    pub async fn clear(&mut self) -> QueueResult<()> {
        self.commit(VecDeque::new()).await?;
        tracing::info!("Queue cleared");
        Ok(())
    }

    /// Snapshot of the queue, oldest first.
    pub fn peek_all(&self) -> Vec<WireMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `next` and, if allowed, make it the current state.
    async fn commit(&mut self, next: VecDeque<WireMessage>) -> QueueResult<()> {
        let attempts = match self.mode {
            StorageMode::Durable => 2,
            StorageMode::MemoryOnly => 1,
        };

        let mut last_error = None;
        for _ in 0..attempts {
            match self.persist(&next).await {
                Ok(()) => {
                    if self.mode == StorageMode::MemoryOnly {
                        tracing::info!(path = %self.path.display(), "Queue storage recovered, back to durable mode");
                    }
                    self.mode = StorageMode::Durable;
                    self.entries = next;
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        match self.mode {
            StorageMode::Durable => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %reason,
                    "Failed to persist queue, switching to memory-only mode"
                );
                self.mode = StorageMode::MemoryOnly;
                Err(QueueError::StorageUnavailable(reason))
            }
            StorageMode::MemoryOnly => {
                tracing::debug!(error = %reason, "Queue still memory-only");
                self.entries = next;
                Ok(())
            }
        }
    }

    async fn persist(&self, entries: &VecDeque<WireMessage>) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(entries).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}
