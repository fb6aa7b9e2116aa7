//! Bounded priority queue of pending sentinel events.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use serde::Serialize;
use tracing::{debug, warn};

use crate::event::{EventPriority, SentinelEvent};

/// Default maximum number of pending events.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Counters describing queue activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Events currently waiting.
    pub depth: usize,
    /// Events discarded because the queue was full.
    pub dropped: u64,
    /// Events handed out for processing.
    pub processed: u64,
}

/// Result of offering an event to a full or non-full queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The event was queued without displacing anything.
    Accepted,
    /// The event was queued and the lowest-priority tail event was dropped.
    Displaced(SentinelEvent),
    /// The queue was full of equal or higher priority work; the event was dropped.
    Rejected,
}

/// Highest priority first, FIFO among equal priorities, bounded depth.
#[derive(Debug)]
pub struct PriorityEventQueue {
    // Keyed so that the last entry is the next to process.
    entries: BTreeMap<(EventPriority, Reverse<u64>), SentinelEvent>,
    capacity: NonZeroUsize,
    next_seq: u64,
    dropped: u64,
    processed: u64,
}

impl Default for PriorityEventQueue {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl PriorityEventQueue {
    /// Creates a queue holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
            next_seq: 0,
            dropped: 0,
            processed: 0,
        }
    }

    /// Offers an event.
    ///
    /// When full, the lowest-priority, most recently queued event is dropped if
    /// the newcomer outranks it; otherwise the newcomer is dropped.
    pub fn push(&mut self, event: SentinelEvent) -> Admission {
        let key = (event.priority, Reverse(self.next_seq));
        self.next_seq += 1;

        if self.entries.len() < self.capacity.get() {
            self.entries.insert(key, event);
            return Admission::Accepted;
        }

        let tail = self.entries.keys().next().copied();
        match tail {
            Some(tail) if tail.0 < event.priority => {
                self.dropped += 1;
                let displaced = self.entries.remove(&tail);
                self.entries.insert(key, event);
                match displaced {
                    Some(displaced) => {
                        debug!(path = %displaced.path, "queue full, dropped lowest-priority event");
                        Admission::Displaced(displaced)
                    }
                    None => Admission::Accepted,
                }
            }
            _ => {
                self.dropped += 1;
                warn!(path = %event.path, priority = ?event.priority, "queue full, event dropped");
                Admission::Rejected
            }
        }
    }

    /// Removes the next event to process.
    pub fn pop(&mut self) -> Option<SentinelEvent> {
        let (_, event) = self.entries.pop_last()?;
        self.processed += 1;
        Some(event)
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.entries.len(),
            dropped: self.dropped,
            processed: self.processed,
        }
    }
}
