//! Pending-write coalescing
//!
//! Writes to the same target inside the window collapse into the latest
//! value. The window starts at the first pending write for a key, so a
//! steady stream of writes is still flushed once per window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct PendingWrite<T> {
    value: T,
    first_seen: Instant,
    /// Insertion order, keeps flushes deterministic
    seq: u64,
}

/// Latest-value-wins buffer keyed by write target
#[derive(Debug)]
pub struct WriteDebouncer<T> {
    window: Duration,
    pending: HashMap<String, PendingWrite<T>>,
    next_seq: u64,
    coalesced: u64,
}

impl<T> WriteDebouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            next_seq: 0,
            coalesced: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes replaced by a newer value
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Queue `value` for `key`, replacing any pending value
    pub fn push(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        if let Some(entry) = self.pending.get_mut(&key) {
            entry.value = value;
            self.coalesced += 1;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            key,
            PendingWrite {
                value,
                first_seen: Instant::now(),
                seq,
            },
        );
    }

    /// Earliest flush time among pending writes
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.first_seen + self.window).min()
    }

    /// Remove and return writes whose window has elapsed at `now`
    pub fn take_due(&mut self, now: Instant) -> Vec<T> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.first_seen + self.window <= now)
            .map(|(k, _)| k.clone())
            .collect();
        self.drain_keys(due)
    }

    /// Drop every pending write, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    fn drain_keys(&mut self, keys: Vec<String>) -> Vec<T> {
        let mut entries: Vec<PendingWrite<T>> = keys.iter().filter_map(|k| self.pending.remove(k)).collect();
        entries.sort_by_key(|p| p.seq);
        entries.into_iter().map(|p| p.value).collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_latest_value_wins() {
        let mut debouncer = WriteDebouncer::new(Duration::from_millis(2000));
        debouncer.push("relay/state", 1);
        tokio::time::advance(Duration::from_millis(500)).await;
        debouncer.push("relay/state", 2);

        assert!(debouncer.take_due(Instant::now()).is_empty());
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(debouncer.take_due(Instant::now()), vec![2]);
        assert!(debouncer.is_empty());
        assert_eq!(debouncer.coalesced(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_from_first_write() {
        let mut debouncer = WriteDebouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        debouncer.push("a", "x");
        tokio::time::advance(Duration::from_millis(60)).await;
        debouncer.push("b", "y");
        debouncer.push("a", "z");

        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(100)));
        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(debouncer.take_due(Instant::now()), vec!["z"]);
        assert_eq!(debouncer.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_writes_keep_arrival_order() {
        let mut debouncer = WriteDebouncer::new(Duration::from_secs(2));
        debouncer.push("c", 3);
        debouncer.push("a", 1);
        debouncer.push("b", 2);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(debouncer.take_due(Instant::now()), vec![3, 1, 2]);
        assert_eq!(debouncer.next_deadline(), None);
    }

    #[test]
    fn test_clear() {
        let mut debouncer = WriteDebouncer::new(Duration::ZERO);
        assert!(!debouncer.is_enabled());
        debouncer.push("a", 1);
        assert_eq!(debouncer.clear(), 1);
        assert!(debouncer.is_empty());
    }
}
