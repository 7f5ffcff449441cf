//! Instances that changed but have not been picked up by a pass yet
//!
//! The controller collapses repeated triggers of one instance on its own; the backlog
//! only remembers when each waiting instance was first triggered, so health checks can
//! tell a slow queue from a stuck one.
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;

/// Shared record of waiting instance keys; clones share the same record
#[derive(Clone, Default)]
pub struct Backlog {
    waiting: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Backlog {
    /// An empty backlog
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a change of `key`
    ///
    /// A key that is already waiting keeps the time of its first trigger.
    pub fn triggered(&self, key: String) {
        self.waiting.lock().entry(key).or_insert_with(Instant::now);
    }

    /// `key` was picked up by a pass, or no longer exists
    pub fn picked_up(&self, key: &str) {
        self.waiting.lock().remove(key);
    }

    /// Number of waiting keys
    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How long the longest waiting key has waited
    pub fn oldest_wait(&self) -> Option<Duration> {
        self.waiting.lock().values().min().map(Instant::elapsed)
    }

    /// Whether some key has waited longer than `stall`
    pub fn is_stalled(&self, stall: Duration) -> bool {
        self.oldest_wait().is_some_and(|waited| waited > stall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn repeated_triggers_keep_the_first_time() {
        let backlog = Backlog::new();
        backlog.triggered("monitoring/system".into());
        tokio::time::advance(Duration::from_secs(10)).await;
        backlog.triggered("monitoring/system".into());
        backlog.triggered("monitoring/other".into());
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.oldest_wait(), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalls_until_picked_up() {
        let backlog = Backlog::new();
        assert!(!backlog.is_stalled(Duration::ZERO));
        backlog.triggered("monitoring/system".into());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(backlog.is_stalled(Duration::from_secs(60)));
        backlog.picked_up("monitoring/system");
        assert!(backlog.is_empty());
        assert!(!backlog.is_stalled(Duration::from_secs(60)));
    }
}
