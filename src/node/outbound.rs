//! bounded outbound queue with lossy, non-blocking admission.
//!
//! the producer side (`offer`) never waits: when the queue is full the
//! configured [`DropPolicy`] decides which packet is lost. the consumer side
//! (`pop`) waits for an item or for the queue to close. surviving items keep
//! their original relative order.

use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// full queue rejects the incoming item
    #[default]
    #[serde(alias = "drop_newest")]
    Newest,
    /// full queue evicts its oldest item to make room
    #[serde(alias = "drop_oldest")]
    Oldest,
}

/// outcome of [`OutboundQueue::offer`]
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<T> {
    Accepted,
    /// queue was full; the offered item was dropped
    Rejected,
    /// queue was full; this older item was evicted instead
    Evicted(T),
    /// queue is closed; the offered item was dropped
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct OutboundQueue<T> {
    state: Mutex<State<T>>,
    changed: Notify,
    capacity: usize,
    policy: DropPolicy,
}

impl<T> OutboundQueue<T> {
    /// a capacity of zero is bumped to one
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State { items: VecDeque::with_capacity(capacity), closed: false }),
            changed: Notify::new(),
            capacity,
            policy,
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// admit an item without ever blocking
    pub fn offer(&self, item: T) -> Admission<T> {
        let admission = {
            let mut state = self.state();
            if state.closed {
                return Admission::Closed;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                Admission::Accepted
            } else {
                match self.policy {
                    DropPolicy::Newest => return Admission::Rejected,
                    DropPolicy::Oldest => {
                        let evicted = state.items.pop_front();
                        state.items.push_back(item);
                        evicted.map_or(Admission::Accepted, Admission::Evicted)
                    }
                }
            }
        };
        self.changed.notify_waiters();
        admission
    }

    /// next item in admission order; None once closed and empty
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// resolves once close() has been called
    pub async fn closed(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// stop admitting; items already queued stay poppable
    pub fn close(&self) {
        self.state().closed = true;
        self.changed.notify_waiters();
    }

    /// take everything still queued
    pub fn drain(&self) -> Vec<T> {
        self.state().items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn newest_drop_keeps_what_was_already_queued() {
        let q = OutboundQueue::new(1, DropPolicy::Newest);
        assert_eq!(q.offer("first"), Admission::Accepted);
        assert_eq!(q.offer("second"), Admission::Rejected);
        assert_eq!(q.drain(), vec!["first"]);
    }

    #[test]
    fn oldest_drop_keeps_most_recent() {
        let q = OutboundQueue::new(1, DropPolicy::Oldest);
        assert_eq!(q.offer("first"), Admission::Accepted);
        assert_eq!(q.offer("second"), Admission::Evicted("first"));
        assert_eq!(q.drain(), vec!["second"]);
    }

    #[test]
    fn survivors_keep_relative_order() {
        let q = OutboundQueue::new(3, DropPolicy::Oldest);
        for i in 0..6 {
            q.offer(i);
        }
        assert_eq!(q.drain(), vec![3, 4, 5]);

        let q = OutboundQueue::new(3, DropPolicy::Newest);
        for i in 0..6 {
            q.offer(i);
        }
        assert_eq!(q.drain(), vec![0, 1, 2]);
    }

    #[test]
    fn offer_after_close_is_refused() {
        let q = OutboundQueue::new(4, DropPolicy::Newest);
        q.close();
        assert_eq!(q.offer(1), Admission::Closed);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_offer() {
        let q = Arc::new(OutboundQueue::new(2, DropPolicy::Newest));
        let consumer = tokio::spawn({
            let q = q.clone();
            async move { q.pop().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.offer(42);
        assert_eq!(consumer.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn pop_drains_then_reports_close() {
        let q = OutboundQueue::new(2, DropPolicy::Newest);
        q.offer(1);
        q.close();
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, None);
        q.closed().await;
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumer() {
        let q = Arc::new(OutboundQueue::<u8>::new(2, DropPolicy::Newest));
        let consumer = tokio::spawn({
            let q = q.clone();
            async move { q.pop().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        assert_eq!(consumer.await.unwrap(), None);
    }
}
