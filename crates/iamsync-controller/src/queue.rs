//! Keyed work queue with per-key serialization.
//!
//! A key is queued at most once. A key handed to a worker is `active` until
//! `done`; adds for an active key only mark it dirty, and a dirty key is
//! queued again when its current pass finishes. Two passes for the same
//! object therefore never overlap, while different keys run concurrently.

use iamsync_kernel::{Kind, ObjectKey};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

pub type WorkKey = (Kind, ObjectKey);

#[derive(Default)]
struct QueueState {
    ready: VecDeque<WorkKey>,
    queued: HashSet<WorkKey>,
    active: HashSet<WorkKey>,
    dirty: HashSet<WorkKey>,
    failures: HashMap<WorkKey, u32>,
    /// Failure retries scheduled on a timer and not yet fired.
    pending_retries: usize,
    shutdown: bool,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, key: WorkKey) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.ready.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue `key` after `delay`. `retry` marks failure retries, which keep
    /// the queue from counting as settled while they are outstanding.
    pub fn add_after(self: &Arc<Self>, key: WorkKey, delay: Duration, retry: bool) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if retry {
            self.lock().pending_retries += 1;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if retry {
                let mut state = queue.lock();
                state.pending_retries = state.pending_retries.saturating_sub(1);
            }
            queue.add(key);
        });
    }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn next(&self) -> Option<WorkKey> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Finish the pass for `key`, re-queueing it if it was marked dirty.
    pub fn done(&self, key: &WorkKey) {
        let mut state = self.lock();
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.queued.insert(key.clone()) {
            state.ready.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Count a failure for `key`; returns the consecutive failure count.
    pub fn record_failure(&self, key: &WorkKey) -> u32 {
        let mut state = self.lock();
        let failures = state.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        *failures
    }

    pub fn forget(&self, key: &WorkKey) {
        self.lock().failures.remove(key);
    }

    /// Nothing queued, running or waiting to be retried.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.ready.is_empty() && state.active.is_empty() && state.pending_retries == 0
    }

    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> WorkKey {
        (Kind::Policy, ObjectKey::new("default", name))
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add(key("p1"));
        queue.add(key("p1"));
        queue.add(key("p2"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().await, Some(key("p1")));
        assert_eq!(queue.next().await, Some(key("p2")));
    }

    #[tokio::test]
    async fn active_key_is_deferred_until_done() {
        let queue = WorkQueue::new();
        queue.add(key("p1"));
        let first = queue.next().await.expect("first pass");
        queue.add(key("p1"));
        assert!(queue.is_empty(), "active key must not be queued twice");
        queue.done(&first);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some(key("p1")));
    }

    #[tokio::test]
    async fn shutdown_wakes_waiters() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        let result = waiter.await.expect("waiter task");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn failures_accumulate_until_forgotten() {
        let queue = WorkQueue::new();
        assert_eq!(queue.record_failure(&key("p1")), 1);
        assert_eq!(queue.record_failure(&key("p1")), 2);
        queue.forget(&key("p1"));
        assert_eq!(queue.record_failure(&key("p1")), 1);
    }

    #[tokio::test]
    async fn delayed_retry_counts_as_pending() {
        let queue = WorkQueue::new();
        queue.add_after(key("p1"), Duration::from_millis(20), true);
        assert!(!queue.is_idle());
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.len(), 1);
    }
}
