//! Connector message queue
//!
//! Plain FIFO between codecs and consumers. No priorities, no deduplication,
//! and a dequeued message is never put back.

use std::collections::VecDeque;

use fb_comlink::Message;
use tracing::{debug, warn};

use crate::core::config::{OverflowPolicy, QueueConfig};

#[derive(Debug)]
pub struct MessageQueue {
    items: VecDeque<Message>,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
    dropped: u64,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl MessageQueue {
    pub fn unbounded() -> Self {
        Self {
            items: VecDeque::new(),
            capacity: None,
            overflow: OverflowPolicy::Unbounded,
            dropped: 0,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        let capacity = match config.overflow {
            OverflowPolicy::Unbounded => None,
            _ => config.capacity.map(|c| c.max(1)),
        };
        Self {
            items: VecDeque::with_capacity(capacity.unwrap_or(0)),
            capacity,
            overflow: if capacity.is_some() {
                config.overflow
            } else {
                OverflowPolicy::Unbounded
            },
            dropped: 0,
        }
    }

    /// Add a message at the tail.
    ///
    /// Returns false only when a bounded queue rejected `message` under
    /// `drop_newest`; unbounded queues always accept.
    pub fn append(&mut self, message: Message) -> bool {
        if let Some(capacity) = self.capacity {
            if self.items.len() >= capacity {
                self.dropped += 1;
                match self.overflow {
                    OverflowPolicy::DropNewest => {
                        warn!("Queue full ({}), dropping incoming {} message", capacity, message.kind());
                        return false;
                    },
                    _ => {
                        if let Some(oldest) = self.items.pop_front() {
                            warn!("Queue full ({}), dropping oldest {} message", capacity, oldest.kind());
                        }
                    },
                }
            }
        }
        debug!(kind = message.kind().as_str(), len = self.items.len() + 1, "Appended message to queue");
        self.items.push_back(message);
        true
    }

    /// Pop the head message, if any. Never blocks.
    pub fn dequeue(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Discard everything, returning how many messages were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    /// Messages lost to the overflow policy
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
