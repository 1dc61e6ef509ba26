//! # Bounded Hand-off Queues
//!
//! The frame, control and response queues are all [`BoundedQueue`]s: FIFO,
//! safe to share between tasks behind an `Arc`, with a fixed capacity and an
//! explicit [`OverflowPolicy`].
//!
//! ## Synchronization:
//! - Each queue owns its own `Mutex<VecDeque<T>>`. The lock is only held for
//!   the O(1) push/pop itself and never across an `.await`.
//! - Consumers wait on a `Notify` instead of sleeping in a fixed loop, bounded
//!   by the timeout they pass to [`BoundedQueue::pop_timeout`].
//! - Producers using [`OverflowPolicy::Block`] wait on a second `Notify` that
//!   is signalled whenever an item is popped.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// What a full queue does with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The producer waits until the consumer frees a slot
    Block,
    /// The oldest queued item is evicted to make room
    DropOldest,
}

/// Result of a timed pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    /// Nothing arrived within the timeout
    Empty,
    /// The queue is closed and fully drained
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct BoundedQueue<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Signalled on push and close
    readable: Notify,
    /// Signalled on pop and close
    writable: Notify,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity,
            policy,
            readable: Notify::new(),
            writable: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push an item, applying the overflow policy when the queue is full.
    pub async fn push(&self, item: T) -> RelayResult<()> {
        let mut item = item;
        loop {
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(TryPushError::Closed) => return Err(RelayError::QueueClosed),
                Err(TryPushError::Full(rejected)) => {
                    item = rejected;
                    self.writable.notified().await;
                }
            }
        }
    }

    /// Push without waiting. Under `Block` a full queue hands the item back.
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(TryPushError::Closed);
            }
            if inner.items.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::Block => return Err(TryPushError::Full(item)),
                    OverflowPolicy::DropOldest => {
                        inner.items.pop_front();
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if total.is_power_of_two() {
                            tracing::warn!(queue = self.name, dropped = total, "Queue full, dropping oldest item");
                        }
                    }
                }
            }
            inner.items.push_back(item);
        }
        self.readable.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.writable.notify_one();
        }
        item
    }

    /// Pop the oldest item, waiting at most `wait` for one to arrive.
    pub async fn pop_timeout(&self, wait: Duration) -> Pop<T> {
        if let Some(pop) = self.pop_now() {
            return pop;
        }
        // notify_one stores a permit when nobody is waiting, so a push landing
        // between pop_now and here still wakes us.
        let _ = tokio::time::timeout(wait, self.readable.notified()).await;
        self.pop_now().unwrap_or(Pop::Empty)
    }

    fn pop_now(&self) -> Option<Pop<T>> {
        let popped = {
            let mut inner = self.lock();
            match inner.items.pop_front() {
                Some(item) => Pop::Item(item),
                None if inner.closed => Pop::Closed,
                None => return None,
            }
        };
        if matches!(popped, Pop::Item(_)) {
            self.writable.notify_one();
        }
        Some(popped)
    }

    /// Refuse further pushes. Items already queued can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_waiters();
        self.readable.notify_one();
        self.writable.notify_waiters();
        self.writable.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Items evicted by `DropOldest` since the queue was created.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    Full(T),
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new("test", 8, OverflowPolicy::Block);
        for i in 0..5 {
            queue.try_push(i).unwrap();
        }
        let drained: Vec<i32> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let queue = BoundedQueue::new("frames", 3, OverflowPolicy::DropOldest);
        for i in 0..5 {
            queue.try_push(i).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);
        let drained: Vec<i32> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![2, 3, 4]);
    }

    #[test]
    fn test_block_policy_rejects_try_push_when_full() {
        let queue = BoundedQueue::new("control", 1, OverflowPolicy::Block);
        queue.try_push("a").unwrap();
        assert_eq!(queue.try_push("b"), Err(TryPushError::Full("b")));
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn test_blocked_producer_resumes_after_pop() {
        let queue = Arc::new(BoundedQueue::new("control", 1, OverflowPolicy::Block));
        queue.push(1).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(2).await })
        };
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        assert_eq!(queue.try_pop(), Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_pop_timeout_empty_then_item() {
        let queue = Arc::new(BoundedQueue::new("frames", 4, OverflowPolicy::DropOldest));
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)).await, Pop::Empty);

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_timeout(Duration::from_secs(5)).await })
        };
        queue.push(7u8).await.unwrap();
        assert_eq!(consumer.await.unwrap(), Pop::Item(7));
    }

    #[tokio::test]
    async fn test_close_drains_then_reports_closed() {
        let queue = BoundedQueue::new("frames", 4, OverflowPolicy::DropOldest);
        queue.push(1).await.unwrap();
        queue.close();
        assert!(matches!(queue.push(2).await, Err(RelayError::QueueClosed)));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)).await, Pop::Item(1));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)).await, Pop::Closed);
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new("control", 1, OverflowPolicy::Block));
        queue.push(1).await.unwrap();
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(2).await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert!(matches!(producer.await.unwrap(), Err(RelayError::QueueClosed)));
    }
}
