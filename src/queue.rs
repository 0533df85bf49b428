//! Blocking FIFO handing decoded messages from the receiver to consumers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;
use tracing::debug;

use crate::types::ReceiverError;

/// Multi-consumer FIFO queue.
///
/// Every successful [`push`](Self::push) adds one permit to an availability
/// semaphore; every pop consumes one permit before touching the deque, so a
/// pop never observes an empty queue and a push that happens before a pop
/// starts waiting is never missed. The deque lock is only held for the
/// append or removal itself.
pub struct MessageQueue<M> {
    items: Mutex<VecDeque<M>>,
    available: Semaphore,
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MessageQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M> MessageQueue<M> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    // A consumer panicking while holding the lock leaves the deque intact.
    fn lock(&self) -> MutexGuard<'_, VecDeque<M>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to the tail and wake one waiting consumer.
    pub fn push(&self, message: M) -> Result<(), ReceiverError> {
        {
            let mut items = self.lock();
            // close() clears under this lock, so check again while holding it
            if self.available.is_closed() {
                return Err(ReceiverError::QueueClosed);
            }
            items.push_back(message);
        }
        self.available.add_permits(1);
        Ok(())
    }

    /// Wait until a message is available and remove it from the head.
    pub async fn pop(&self) -> Result<M, ReceiverError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| ReceiverError::QueueClosed)?;
        permit.forget();

        let mut items = self.lock();
        let message = items.pop_front().ok_or(ReceiverError::QueueClosed)?;
        debug!(waiting = items.len(), "message popped");
        Ok(message)
    }

    /// [`pop`](Self::pop) for threads that are not running async code.
    ///
    /// Must not be called from within an async runtime worker.
    pub fn blocking_pop(&self) -> Result<M, ReceiverError> {
        futures::executor::block_on(self.pop())
    }

    /// Close the queue: pending and future pops fail with `QueueClosed`,
    /// pushes are rejected and undelivered messages are dropped.
    pub fn close(&self) {
        self.available.close();
        let dropped = {
            let mut items = self.lock();
            let dropped = items.len();
            items.clear();
            dropped
        };
        debug!(dropped, "message queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.available.is_closed()
    }

    /// Number of messages waiting to be popped.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
