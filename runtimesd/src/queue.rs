//! Bounded build queue with a drop-oldest overflow policy.
//!
//! Producers never wait: when the queue is full the oldest pending event is
//! evicted to make room. Workers wait in [`BuildQueue::pop`] until an event
//! arrives or the queue is closed and empty.

use runtimes_common::BuildEvent;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Result of offering an event to the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// Admitted without displacing anything.
    Queued,
    /// Admitted; the returned oldest pending event was dropped.
    Evicted(BuildEvent),
    /// The queue is closed; the offered event is handed back.
    Closed(BuildEvent),
}

struct QueueState {
    items: VecDeque<BuildEvent>,
    closed: bool,
}

/// Fixed-capacity FIFO of pending build events.
pub struct BuildQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    evicted: AtomicU64,
}

impl BuildQueue {
    /// Create a queue holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// Admit an event, evicting the oldest pending one if the queue is full.
    ///
    /// Capacity check, eviction and insertion happen under one lock.
    pub fn push(&self, event: BuildEvent) -> Admission {
        let admission = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return Admission::Closed(event);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(event);
            match evicted {
                Some(old) => Admission::Evicted(old),
                None => Admission::Queued,
            }
        };

        if matches!(admission, Admission::Evicted(_)) {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        admission
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the queue has been closed and fully drained.
    pub async fn pop(&self) -> Option<BuildEvent> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(event) = state.items.pop_front() {
                    // Notify permits do not accumulate, so pass the wakeup
                    // on while events remain.
                    if !state.items.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop admitting events. Pending events remain available to `pop`.
    pub fn close(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events dropped by overflow since startup.
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
