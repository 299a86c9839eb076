//! Rate-limited, de-duplicating work queue of reconciliation keys.
//!
//! Semantics:
//! - A key added while already pending is coalesced into the pending entry.
//! - A key is handed to at most one worker at a time. If it is added again
//!   while a worker holds it, it is re-queued when the worker calls `done`.
//! - `add_rate_limited` delays the add by the key's exponential backoff.
//!   A key has at most one pending delayed add; a second one keeps the
//!   earlier deadline. `forget` cancels the pending delayed add.
//! - After `shutdown`, pending keys are still handed out; once the queue is
//!   empty `get` returns `None` and new adds are ignored.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::backoff::ItemBackoff;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys waiting to be processed.
    dirty: HashSet<String>,
    /// Keys currently held by a worker.
    processing: HashSet<String>,
    /// Keys with a pending delayed add: deadline and waiter id.
    waiting: HashMap<String, (Instant, u64)>,
    next_waiter: u64,
    shutting_down: bool,
}

impl QueueState {
    /// Mark `key` pending. Returns `true` if a worker should be woken.
    fn enqueue(&mut self, key: &str) -> bool {
        if self.shutting_down || self.dirty.contains(key) {
            return false;
        }
        self.dirty.insert(key.to_string());
        if self.processing.contains(key) {
            // Re-queued by `done`.
            return false;
        }
        self.queue.push_back(key.to_string());
        true
    }
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: ItemBackoff,
}

impl WorkQueue {
    pub fn new(backoff: ItemBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    /// Enqueue a key unless it is already pending.
    pub fn add(&self, key: &str) {
        let wake = self.state.lock().expect("queue lock").enqueue(key);
        if wake {
            self.notify.notify_one();
        }
    }

    /// Enqueue a key after its backoff delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = self.backoff.when(key);
        trace!(key, ?delay, "requeue scheduled");
        self.add_after(key, delay);
    }

    /// Enqueue a key after a fixed delay, unless it is already waiting for
    /// an earlier deadline.
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready_at = Instant::now() + delay;
        let id = {
            let mut state = self.state.lock().expect("queue lock");
            if state.shutting_down {
                return;
            }
            if let Some((deadline, _)) = state.waiting.get(key) {
                if *deadline <= ready_at {
                    trace!(key, "delayed add already pending");
                    return;
                }
            }
            state.next_waiter += 1;
            let id = state.next_waiter;
            state.waiting.insert(key.to_string(), (ready_at, id));
            id
        };

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(ready_at).await;
            queue.fire_waiter(&key, id);
        });
    }

    /// Enqueue `key` if waiter `id` is still the one registered for it.
    fn fire_waiter(&self, key: &str, id: u64) {
        let mut state = self.state.lock().expect("queue lock");
        // Superseded by an earlier deadline, or forgotten.
        if state.waiting.get(key).map(|(_, current)| *current) != Some(id) {
            return;
        }
        state.waiting.remove(key);
        let wake = state.enqueue(key);
        drop(state);
        if wake {
            self.notify.notify_one();
        }
    }

    /// Wait for the next key. Returns `None` once shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().expect("queue lock");
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key taken with `get`.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().expect("queue lock");
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clear the retry history of a key and cancel its delayed add.
    pub fn forget(&self, key: &str) {
        self.state.lock().expect("queue lock").waiting.remove(key);
        self.backoff.forget(key);
    }

    /// Whether `key` has a pending delayed add.
    pub fn is_waiting(&self, key: &str) -> bool {
        self.state.lock().expect("queue lock").waiting.contains_key(key)
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.backoff.num_requeues(key)
    }

    /// Stop accepting keys and wake every waiting worker.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("queue lock");
        state.shutting_down = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().expect("queue lock").shutting_down
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(ItemBackoff::default())
    }
}
