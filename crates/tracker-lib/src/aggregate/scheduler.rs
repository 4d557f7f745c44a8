//! Keyed coalescing timers

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs at most one pending callback per key
///
/// Scheduling a key that already has a pending callback cancels it
/// first, so a burst of requests collapses into the last one. Must be
/// used from within a tokio runtime.
pub struct CoalescingScheduler<K> {
    timers: HashMap<K, JoinHandle<()>>,
}

impl<K> Default for CoalescingScheduler<K> {
    fn default() -> Self {
        Self {
            timers: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> CoalescingScheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` after `delay`, replacing any pending run for `key`
    pub fn schedule<F>(&mut self, key: K, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = self.timers.remove(&key) {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        self.timers.insert(key, handle);
    }

    /// Cancel the pending run for `key`; returns whether one was pending
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.timers
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn pending_count(&self) -> usize {
        self.timers.values().filter(|h| !h.is_finished()).count()
    }
}

impl<K> Drop for CoalescingScheduler<K> {
    fn drop(&mut self) {
        for handle in self.timers.values() {
            handle.abort();
        }
    }
}
