//! BoundedBuffer<T>: a fixed-capacity FIFO queue built from a pair of
//! counting semaphores, one per direction, guarding a plain VecDeque.
//!
//! The semaphores sit behind their own `parking_lot::Mutex<Arc<Semaphore>>`
//! rather than being bare fields: `tokio::sync::Semaphore::close()` is
//! permanent, but `restart()` needs to reopen a stopped buffer for a
//! pipeline restart, so a stopped pair is swapped for a fresh one instead
//! of trying to un-close it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);
const POP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Refused,
}

pub struct BoundedBuffer<T> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    free: Mutex<Arc<Semaphore>>,
    filled: Mutex<Arc<Semaphore>>,
    stopped: AtomicBool,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "BoundedBuffer capacity must be at least 1");
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            free: Mutex::new(Arc::new(Semaphore::new(capacity))),
            filled: Mutex::new(Arc::new(Semaphore::new(0))),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.capacity as f64
    }

    /// Blocks (up to a 5s fallback) until a slot is free, then enqueues.
    pub async fn push(&self, item: T) -> Outcome {
        if self.stopped.load(Ordering::Acquire) {
            return Outcome::Refused;
        }
        let free = self.free.lock().clone();
        let permit = match tokio::time::timeout(PUSH_TIMEOUT, free.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return Outcome::Refused,
        };
        permit.forget();
        {
            let mut q = self.queue.lock();
            q.push_back(item);
            self.filled.lock().add_permits(1);
        }
        Outcome::Accepted
    }

    /// Blocks (up to a 5s fallback) until an item is available, then dequeues.
    pub async fn pop(&self) -> Option<T> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        let filled = self.filled.lock().clone();
        let permit = match tokio::time::timeout(POP_TIMEOUT, filled.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return None,
        };
        permit.forget();
        let item = {
            let mut q = self.queue.lock();
            let item = q.pop_front();
            self.free.lock().add_permits(1);
            item
        };
        item
    }

    /// Non-blocking push. Returns the item back on refusal (buffer full or
    /// stopped) so the caller can decide what to do with it.
    pub fn try_push(&self, item: T) -> Result<Outcome, T> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(Outcome::Refused);
        }
        match self.free.lock().clone().try_acquire_owned() {
            Ok(permit) => {
                permit.forget();
                {
                    let mut q = self.queue.lock();
                    q.push_back(item);
                    self.filled.lock().add_permits(1);
                }
                Ok(Outcome::Accepted)
            }
            Err(_) => Err(item),
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        match self.filled.lock().clone().try_acquire_owned() {
            Ok(permit) => {
                permit.forget();
                let item = {
                    let mut q = self.queue.lock();
                    let item = q.pop_front();
                    self.free.lock().add_permits(1);
                    item
                };
                item
            }
            Err(_) => None,
        }
    }

    /// Idempotent. Closes both semaphores, which promptly wakes every
    /// pending push/pop with a refusal instead of leaving them blocked.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.free.lock().close();
        self.filled.lock().close();
    }

    /// Reopens a stopped buffer for a pipeline restart: drops the closed
    /// semaphores for fresh ones (closing is permanent in `tokio`, so an
    /// in-place "reopen" isn't possible) and discards any residual queue
    /// contents.
    pub fn restart(&self) {
        let mut q = self.queue.lock();
        q.clear();
        *self.free.lock() = Arc::new(Semaphore::new(self.capacity));
        *self.filled.lock() = Arc::new(Semaphore::new(0));
        self.stopped.store(false, Ordering::Release);
    }

    /// Atomically empties the queue. Held under the same lock push/pop use
    /// around their enqueue/dequeue-plus-credit step, so it can never
    /// desync the semaphore counts from the queue's actual contents.
    pub fn clear(&self) {
        let mut q = self.queue.lock();
        let n = q.len();
        q.clear();
        if n > 0 {
            if let Ok(permits) = self.filled.lock().clone().try_acquire_many_owned(n as u32) {
                permits.forget();
            }
            self.free.lock().add_permits(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_pop_preserves_fifo_order() {
        let buf: BoundedBuffer<u32> = BoundedBuffer::new(4);
        buf.push(1).await;
        buf.push(2).await;
        buf.push(3).await;
        assert_eq!(buf.pop().await, Some(1));
        assert_eq!(buf.pop().await, Some(2));
        assert_eq!(buf.pop().await, Some(3));
    }

    #[tokio::test]
    async fn push_blocks_when_full_until_a_slot_frees() {
        let buf = Arc::new(BoundedBuffer::new(1));
        buf.push(1).await;
        assert!(buf.is_full());

        let buf2 = buf.clone();
        let handle = tokio::spawn(async move {
            buf2.push(2).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        assert_eq!(buf.pop().await, Some(1));
        handle.await.unwrap();
        assert_eq!(buf.pop().await, Some(2));
    }

    #[tokio::test]
    async fn try_push_refuses_without_blocking_when_full() {
        let buf = BoundedBuffer::new(1);
        assert_eq!(buf.try_push(1), Ok(Outcome::Accepted));
        assert_eq!(buf.try_push(2), Err(2));
    }

    #[tokio::test]
    async fn stop_wakes_pending_waiters_with_a_refusal() {
        let buf = Arc::new(BoundedBuffer::new(1));
        buf.push(1).await; // fills it

        let buf2 = buf.clone();
        let handle = tokio::spawn(async move { buf2.push(2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        buf.stop();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, Outcome::Refused);
        assert_eq!(buf.pop().await, None);
    }

    #[tokio::test]
    async fn clear_empties_queue_and_restores_capacity() {
        let buf = BoundedBuffer::new(3);
        buf.push(1).await;
        buf.push(2).await;
        assert_eq!(buf.size(), 2);

        buf.clear();
        assert_eq!(buf.size(), 0);

        for i in 0..3 {
            assert_eq!(buf.try_push(i), Ok(Outcome::Accepted));
        }
        assert!(buf.is_full());
    }

    #[tokio::test]
    async fn restart_reopens_a_stopped_buffer() {
        let buf = BoundedBuffer::new(2);
        buf.push(1).await;
        buf.stop();
        assert_eq!(buf.try_push(2), Ok(Outcome::Refused));

        buf.restart();
        assert!(buf.is_empty());
        assert_eq!(buf.try_push(9), Ok(Outcome::Accepted));
        assert_eq!(buf.pop().await, Some(9));
    }
}
