//! Bounded hand-off queues between pipeline contexts.
//!
//! Producers never block: when a queue is full the overflow policy
//! evicts an older entry to make room. The single consumer awaits
//! [`BoundedQueue::pop`], which returns `None` once the queue is closed.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::types::{EncodedUnit, RawFrame};

// ── QueueItem ────────────────────────────────────────────────────

/// Items that may be protected from eviction.
pub trait QueueItem {
    /// Key-frames are evicted only when nothing else can be.
    fn is_key_frame(&self) -> bool {
        false
    }
}

impl QueueItem for RawFrame {}

impl QueueItem for EncodedUnit {
    fn is_key_frame(&self) -> bool {
        EncodedUnit::is_key_frame(self)
    }
}

// ── OverflowPolicy / PushOutcome ─────────────────────────────────

/// What to discard when a push finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest entry.
    DropOldest,
    /// Discard the oldest non-key entry; the oldest entry only when
    /// every queued item is a key-frame.
    DropOldestDelta,
}

/// Result of a non-blocking push.
#[derive(Debug)]
pub enum PushOutcome<T> {
    Queued,
    /// Queued after discarding the returned entry.
    Evicted(T),
    /// The queue is closed; the item is handed back.
    Closed(T),
}

impl<T> PushOutcome<T> {
    pub fn is_queued(&self) -> bool {
        !matches!(self, PushOutcome::Closed(_))
    }
}

/// Counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub evicted: u64,
    /// Largest length ever observed.
    pub high_water: usize,
    pub len: usize,
    pub capacity: usize,
}

// ── BoundedQueue ─────────────────────────────────────────────────

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    stats: QueueStats,
}

/// Fixed-capacity single-consumer queue with drop-on-overflow.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    policy: OverflowPolicy,
    capacity: usize,
}

impl<T: QueueItem> BoundedQueue<T> {
    /// Capacity is clamped to at least 1 (2 for `DropOldestDelta`).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let min = match policy {
            OverflowPolicy::DropOldest => 1,
            OverflowPolicy::DropOldestDelta => 2,
        };
        let capacity = capacity.max(min);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                stats: QueueStats {
                    capacity,
                    ..Default::default()
                },
            }),
            notify: Notify::new(),
            policy,
            capacity,
        }
    }

    /// Enqueue without blocking, evicting per the overflow policy.
    pub fn push(&self, item: T) -> PushOutcome<T> {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return PushOutcome::Closed(item);
            }
            let evicted = if inner.items.len() >= self.capacity {
                let idx = match self.policy {
                    OverflowPolicy::DropOldest => 0,
                    OverflowPolicy::DropOldestDelta => inner
                        .items
                        .iter()
                        .position(|queued| !queued.is_key_frame())
                        .unwrap_or(0),
                };
                inner.items.remove(idx)
            } else {
                None
            };
            inner.items.push_back(item);
            inner.stats.pushed += 1;
            inner.stats.len = inner.items.len();
            inner.stats.high_water = inner.stats.high_water.max(inner.items.len());
            match evicted {
                Some(old) => {
                    inner.stats.evicted += 1;
                    PushOutcome::Evicted(old)
                }
                None => PushOutcome::Queued,
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next item. `None` once the queue is closed.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    inner.stats.len = inner.items.len();
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Take the next item if one is ready.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.lock();
        let item = inner.items.pop_front();
        inner.stats.len = inner.items.len();
        item
    }

    /// Close the queue, discard queued items and wake the consumer.
    ///
    /// Returns the number of discarded items. Idempotent.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut inner = self.lock();
            inner.closed = true;
            let n = inner.items.len();
            inner.items.clear();
            inner.stats.len = 0;
            n
        };
        self.notify.notify_waiters();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panicking producer cannot leave the deque half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ────────────────────────────────────────────────────────
