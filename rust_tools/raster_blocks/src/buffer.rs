//! Bounded block buffers between readers, compute workers and the writer.
//!
//! A buffer is a bounded crossbeam channel split into cloneable producer and
//! consumer halves. Both sides wait at most their configured timeout and wake
//! immediately when the run's [`CancelToken`] fires.

use crate::error::{BlockError, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct CancelInner {
    flag: AtomicBool,
    // Dropped on cancel, which disconnects `closed` and wakes every select
    trigger: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

/// Cooperative cancellation shared by every thread of a run.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, closed) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                closed,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled. Workers call this between blocks.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BlockError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Becomes ready (disconnected) when the token is cancelled.
    pub(crate) fn closed(&self) -> &Receiver<()> {
        &self.inner.closed
    }
}

/// Create a buffer holding at most `capacity` items.
pub fn block_buffer<T>(
    name: &str,
    capacity: usize,
    insert_timeout: Duration,
    pop_timeout: Duration,
    cancel: &CancelToken,
) -> (BufferProducer<T>, BufferConsumer<T>) {
    let (sender, receiver) = bounded(capacity.max(1));
    let name: Arc<str> = Arc::from(name);
    (
        BufferProducer {
            name: name.clone(),
            sender,
            timeout: insert_timeout,
            cancel: cancel.clone(),
        },
        BufferConsumer {
            name,
            receiver,
            timeout: pop_timeout,
            cancel: cancel.clone(),
        },
    )
}

pub struct BufferProducer<T> {
    name: Arc<str>,
    sender: Sender<T>,
    timeout: Duration,
    cancel: CancelToken,
}

impl<T> Clone for BufferProducer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> BufferProducer<T> {
    /// Wait for room and add `item`.
    pub fn insert(&self, item: T) -> Result<()> {
        self.cancel.check()?;
        select! {
            send(self.sender, item) -> res => res.map_err(|_| BlockError::Cancelled),
            recv(self.cancel.closed()) -> _ => Err(BlockError::Cancelled),
            default(self.timeout) => Err(BlockError::BufferTimeout {
                buffer: self.name.to_string(),
                operation: "insert",
                timeout: self.timeout,
            }),
        }
    }
}

pub struct BufferConsumer<T> {
    name: Arc<str>,
    receiver: Receiver<T>,
    timeout: Duration,
    cancel: CancelToken,
}

impl<T> Clone for BufferConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            receiver: self.receiver.clone(),
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> BufferConsumer<T> {
    /// Wait for the next item. `Ok(None)` once every producer is gone and the
    /// buffer is empty.
    pub fn pop(&self) -> Result<Option<T>> {
        self.cancel.check()?;
        select! {
            recv(self.receiver) -> msg => Ok(msg.ok()),
            recv(self.cancel.closed()) -> _ => Err(BlockError::Cancelled),
            default(self.timeout) => Err(self.timed_out()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    pub(crate) fn timed_out(&self) -> BlockError {
        BlockError::BufferTimeout {
            buffer: self.name.to_string(),
            operation: "pop",
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn test_insert_pop_in_order() {
        let cancel = CancelToken::new();
        let (producer, consumer) = block_buffer::<usize>("test", 4, LONG, LONG, &cancel);
        for i in 0..4 {
            producer.insert(i).unwrap();
        }
        drop(producer);
        let mut popped = Vec::new();
        while let Some(i) = consumer.pop().unwrap() {
            popped.push(i);
        }
        assert_eq!(popped, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_insert_times_out_when_full() {
        let cancel = CancelToken::new();
        let short = Duration::from_millis(50);
        let (producer, _consumer) = block_buffer::<usize>("full", 1, short, LONG, &cancel);
        producer.insert(1).unwrap();
        let err = producer.insert(2).unwrap_err();
        assert!(matches!(
            err,
            BlockError::BufferTimeout { operation: "insert", ref buffer, .. } if buffer == "full"
        ));
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let cancel = CancelToken::new();
        let (_producer, consumer) =
            block_buffer::<usize>("empty", 1, LONG, Duration::from_millis(50), &cancel);
        assert!(matches!(consumer.pop(), Err(BlockError::BufferTimeout { operation: "pop", .. })));
    }

    #[test]
    fn test_cancel_wakes_blocked_pop() {
        let cancel = CancelToken::new();
        let (_producer, consumer) = block_buffer::<usize>("idle", 1, LONG, LONG, &cancel);

        let start = Instant::now();
        let waiter = thread::spawn(move || consumer.pop());
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(BlockError::Cancelled)));
        assert!(start.elapsed() < LONG);
        assert!(cancel.check().is_err());
    }
}
