//! Request queue — FIFO of fragment requests awaiting execution.
//!
//! Producers call `push` from any task; the executor is the single consumer
//! and parks in `next` while the queue is empty. Malformed requests are
//! rejected at `push` and never enter the queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::{debug, info};

use deployd_core::FragmentRequest;

use crate::error::QueueError;

#[derive(Default)]
struct QueueInner {
    requests: VecDeque<FragmentRequest>,
    closed: bool,
}

/// Unbounded, thread-safe FIFO of [`FragmentRequest`]s.
#[derive(Default)]
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the tail.
    pub fn push(&self, request: FragmentRequest) -> Result<(), QueueError> {
        request.validate()?;

        let mut inner = self.inner.lock().expect("queue lock");
        if inner.closed {
            return Err(QueueError::Closed);
        }
        debug!(
            request_id = %request.request_id,
            stages = request.stages.len(),
            pending = inner.requests.len() + 1,
            "request enqueued"
        );
        inner.requests.push_back(request);
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return the head, or `None` when empty.
    pub fn pop(&self) -> Option<FragmentRequest> {
        let mut inner = self.inner.lock().expect("queue lock");
        inner.requests.pop_front()
    }

    /// Wait for the next request. Returns `None` once closed and drained.
    pub async fn next(&self) -> Option<FragmentRequest> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().expect("queue lock");
                if let Some(request) = inner.requests.pop_front() {
                    return Some(request);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn has_available(&self) -> bool {
        !self.inner.lock().expect("queue lock").requests.is_empty()
    }

    /// Drop every pending request.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        let dropped = inner.requests.len();
        inner.requests.clear();
        if dropped > 0 {
            info!(dropped, "request queue cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock").requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting requests. Pending requests can still be taken.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        inner.closed = true;
        drop(inner);
        info!("request queue closed");
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock").closed
    }
}
