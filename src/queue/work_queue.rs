//! In-memory FIFO work queue with claim/acknowledge semantics and a drain barrier

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error};

/// WorkQueue hands items to concurrent workers exactly once
///
/// Protocol:
/// 1. Producers `push` items (never blocks)
/// 2. A worker `pop`s an item and receives a [`Claim`] for it
/// 3. When the item has been processed the worker acknowledges the claim
/// 4. `join` resolves once nothing is pending and nothing is outstanding
///
/// Acknowledging consumes the claim, so a second ack does not compile.
/// Acknowledging a claim on a queue that did not issue it panics.
/// A claim dropped without an ack is settled as abandoned and logged.
///
/// The handle is cheap to clone; all clones share the same queue.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
    drained: Notify,
}

struct QueueState<T> {
    pending: VecDeque<T>,
    outstanding: usize,
    acknowledged: u64,
    abandoned: u64,
}

impl<T> QueueState<T> {
    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.outstanding == 0
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release one outstanding item and wake `join` waiters if that drained the queue
    fn settle(&self, acknowledged: bool) {
        let drained = {
            let mut state = self.lock();
            assert!(
                state.outstanding > 0,
                "work queue settled more items than were popped"
            );
            state.outstanding -= 1;
            if acknowledged {
                state.acknowledged += 1;
            } else {
                state.abandoned += 1;
            }
            state.is_drained()
        };

        if drained {
            debug!("Work queue drained");
            self.drained.notify_waiters();
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    outstanding: 0,
                    acknowledged: 0,
                    abandoned: 0,
                }),
                available: Notify::new(),
                drained: Notify::new(),
            }),
        }
    }

    /// Append an item to the back of the queue
    pub fn push(&self, item: T) {
        self.shared.lock().pending.push_back(item);
        self.shared.available.notify_waiters();
    }

    /// Append every item in order, returning how many were added
    pub fn extend<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let added = {
            let mut state = self.shared.lock();
            let before = state.pending.len();
            state.pending.extend(items);
            state.pending.len() - before
        };

        if added > 0 {
            self.shared.available.notify_waiters();
        }
        added
    }

    /// Take the front item without waiting
    pub fn try_pop(&self) -> Option<Claim<T>> {
        let mut state = self.shared.lock();
        let item = state.pending.pop_front()?;
        state.outstanding += 1;

        Some(Claim {
            item,
            queue: Arc::clone(&self.shared),
            settled: false,
        })
    }

    /// Wait until an item is available and claim it
    ///
    /// Cancel-safe: dropping the future before it resolves never takes an item.
    pub async fn pop(&self) -> Claim<T> {
        loop {
            // Register interest before looking, so a push between the check
            // and the await still wakes us.
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(claim) = self.try_pop() {
                return claim;
            }

            notified.await;
        }
    }

    /// Acknowledge a claim issued by this queue
    ///
    /// # Panics
    ///
    /// Panics if the claim was popped from a different queue.
    pub fn ack(&self, claim: Claim<T>) {
        assert!(
            Arc::ptr_eq(&self.shared, &claim.queue),
            "claim acknowledged on a queue that did not issue it"
        );
        claim.ack();
    }

    /// Wait until nothing is pending and every popped item has been settled
    pub async fn join(&self) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_drained() {
                return;
            }

            notified.await;
        }
    }

    /// Number of items waiting to be popped
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items popped but not yet settled
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    pub fn is_drained(&self) -> bool {
        self.shared.lock().is_drained()
    }

    /// Total acknowledgments since the queue was created
    pub fn acknowledged(&self) -> u64 {
        self.shared.lock().acknowledged
    }

    /// Total claims dropped without acknowledgment
    pub fn abandoned(&self) -> u64 {
        self.shared.lock().abandoned
    }
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("WorkQueue")
            .field("pending", &state.pending.len())
            .field("outstanding", &state.outstanding)
            .field("acknowledged", &state.acknowledged)
            .field("abandoned", &state.abandoned)
            .finish()
    }
}

/// An item taken from a [`WorkQueue`] that has not been acknowledged yet
#[must_use = "a claim must be acknowledged once its item has been processed"]
pub struct Claim<T> {
    item: T,
    queue: Arc<Shared<T>>,
    settled: bool,
}

impl<T> Claim<T> {
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Mark the item as processed
    pub fn ack(mut self) {
        self.settled = true;
        self.queue.settle(true);
    }
}

impl<T> Drop for Claim<T> {
    fn drop(&mut self) {
        if !self.settled {
            error!("Work item dropped without acknowledgment, settling as abandoned");
            self.settled = true;
            self.queue.settle(false);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Claim<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claim").field("item", &self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push("a");
        queue.push("b");
        queue.extend(["c", "d"]);

        let mut seen = Vec::new();
        while let Some(claim) = queue.try_pop() {
            seen.push(*claim.item());
            claim.ack();
        }

        assert_eq!(seen, vec!["a", "b", "c", "d"]);
        assert_eq!(queue.acknowledged(), 4);
        assert!(queue.is_drained());
    }

    #[test]
    fn test_duplicates_are_independent_items() {
        let queue = WorkQueue::new();
        queue.extend(["same", "same", "same"]);
        assert_eq!(queue.len(), 3);

        let first = queue.try_pop().unwrap();
        let second = queue.try_pop().unwrap();
        assert_eq!(queue.outstanding(), 2);

        queue.ack(first);
        queue.ack(second);
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_drained());
    }

    #[tokio::test]
    async fn test_join_on_empty_queue_returns_immediately() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        timeout(Duration::from_millis(100), queue.join())
            .await
            .expect("join on an empty queue should not block");
    }

    #[tokio::test]
    async fn test_join_waits_for_outstanding_ack() {
        let queue = WorkQueue::new();
        queue.push(1u32);
        let claim = queue.try_pop().unwrap();

        // Nothing pending, but one item is still outstanding
        assert!(queue.is_empty());
        assert!(!queue.is_drained());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.join().await })
        };

        sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        claim.ack();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("join should resolve after the last ack")
            .unwrap();
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = WorkQueue::new();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let claim = queue.pop().await;
                let item = *claim.item();
                claim.ack();
                item
            })
        };

        sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(42u32);
        let item = timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, 42);
    }

    #[tokio::test]
    async fn test_cancelled_pop_keeps_item() {
        let queue = WorkQueue::new();

        // Pop times out on the empty queue and is dropped
        assert!(
            timeout(Duration::from_millis(20), queue.pop())
                .await
                .is_err()
        );

        queue.push("kept");
        let claim = queue.try_pop().expect("item should still be queued");
        assert_eq!(*claim.item(), "kept");
        claim.ack();
    }

    #[tokio::test]
    async fn test_every_item_acknowledged_exactly_once() {
        let queue = WorkQueue::new();
        let total = 200;
        for i in 0..total {
            queue.push(i);
        }

        let seen = Arc::new(Mutex::new(HashMap::<u32, u32>::new()));
        let mut consumers = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            let seen = Arc::clone(&seen);
            consumers.push(tokio::spawn(async move {
                while let Some(claim) = queue.try_pop() {
                    tokio::task::yield_now().await;
                    *seen.lock().unwrap().entry(*claim.item()).or_default() += 1;
                    claim.ack();
                }
            }));
        }

        timeout(Duration::from_secs(5), queue.join()).await.unwrap();
        for consumer in consumers {
            consumer.await.unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), total as usize);
        assert!(seen.values().all(|&count| count == 1));
        assert_eq!(queue.acknowledged(), total as u64);
    }

    #[tokio::test]
    async fn test_dropped_claim_is_abandoned() {
        let queue = WorkQueue::new();
        queue.push(7u8);

        drop(queue.try_pop().unwrap());

        assert_eq!(queue.abandoned(), 1);
        assert_eq!(queue.acknowledged(), 0);
        timeout(Duration::from_millis(100), queue.join())
            .await
            .expect("abandoned claims must not block join");
    }

    #[test]
    #[should_panic(expected = "did not issue it")]
    fn test_ack_on_foreign_queue_panics() {
        let issuing = WorkQueue::new();
        let other = WorkQueue::new();
        issuing.push(1u8);

        let claim = issuing.try_pop().unwrap();
        other.ack(claim);
    }
}
