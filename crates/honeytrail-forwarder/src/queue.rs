use honeytrail_core::config::OverflowPolicy;
use honeytrail_core::EventCandidate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Result of offering an event to the queue
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted without loss
    Queued,
    /// Accepted, but the queue was full and this event had to go
    /// (the evicted oldest one, or the incoming one under `DropNewest`)
    Dropped(EventCandidate),
    /// The queue no longer accepts events
    Closed(EventCandidate),
}

struct QueueState {
    items: VecDeque<EventCandidate>,
    closed: bool,
}

/// Bounded hand-off between the classifier and the delivery workers.
///
/// `push` never waits: when the queue is full the overflow policy decides
/// which event is discarded, so log consumption never stalls on delivery.
pub struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Offer an event without blocking
    pub fn push(&self, event: EventCandidate) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed(event);
            }

            if state.items.len() < self.capacity {
                state.items.push_back(event);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropNewest => return PushOutcome::Dropped(event),
                    OverflowPolicy::DropOldest => {
                        let evicted = state.items.pop_front();
                        state.items.push_back(event);
                        match evicted {
                            Some(evicted) => PushOutcome::Dropped(evicted),
                            None => PushOutcome::Queued,
                        }
                    }
                }
            }
        };

        self.notify.notify_one();
        outcome
    }

    /// Wait for the next event. Returns `None` once closed and empty.
    pub async fn pop(&self) -> Option<EventCandidate> {
        loop {
            // Registered before checking so a push or close in between is not missed
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(event) = state.items.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting events and wake every waiting consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Remove and return everything still pending
    pub fn drain_remaining(&self) -> Vec<EventCandidate> {
        self.state.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
