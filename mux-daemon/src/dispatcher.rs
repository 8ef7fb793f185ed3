//! Observer fan-out: a bounded, per-edge queue with head-drop overflow
//! and age-based expiry on dequeue.
//!
//! Built on `tokio::sync::mpsc::channel`, the same primitive the teacher
//! uses for its source-to-decoder channel. `mpsc::Sender::send` has no
//! "replace oldest" mode, so head-drop-on-full is implemented by
//! draining one item from the shared receiver before retrying the send.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mux_codec::message::{Enqueued, Message};
use tokio::sync::{mpsc, Mutex};

pub const DEFAULT_CAPACITY: usize = 100;

/// One observer edge's inbound queue, owned by the target [`crate::device::Device`].
pub struct Queue {
    sender: mpsc::Sender<Enqueued>,
    receiver: Arc<Mutex<mpsc::Receiver<Enqueued>>>,
    overflow_dropped: Arc<AtomicU64>,
    expired_dropped: AtomicU64,
    max_item_age: Duration,
}

impl Queue {
    pub fn new(capacity: usize, max_item_age: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Queue {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            overflow_dropped: Arc::new(AtomicU64::new(0)),
            expired_dropped: AtomicU64::new(0),
            max_item_age,
        }
    }

    /// A cheaply-cloneable handle any reader task can enqueue into.
    pub fn handle(&self) -> EnqueueHandle {
        EnqueueHandle {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            overflow_dropped: self.overflow_dropped.clone(),
        }
    }

    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped.load(Ordering::Relaxed)
    }

    pub fn expired_dropped(&self) -> u64 {
        self.expired_dropped.load(Ordering::Relaxed)
    }

    /// Dequeue the next non-expired message, dropping (and counting) any
    /// that aged past `max_item_age` first. Returns `None` once every
    /// [`EnqueueHandle`] has been dropped.
    pub async fn recv_fresh(&self) -> Option<Message> {
        loop {
            let item = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await?
            };
            if item.age() > self.max_item_age {
                self.expired_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            return Some(item.message);
        }
    }
}

#[derive(Clone)]
pub struct EnqueueHandle {
    sender: mpsc::Sender<Enqueued>,
    receiver: Arc<Mutex<mpsc::Receiver<Enqueued>>>,
    overflow_dropped: Arc<AtomicU64>,
}

impl EnqueueHandle {
    pub async fn enqueue(&self, message: Message) {
        let item = Enqueued::new(message);
        match self.sender.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(item)) => {
                {
                    let mut receiver = self.receiver.lock().await;
                    let _ = receiver.try_recv();
                }
                self.overflow_dropped.fetch_add(1, Ordering::Relaxed);
                // Best-effort: if another producer raced us for the slot
                // just freed, this message is dropped too and counted
                // the next time the queue is observed full.
                let _ = self.sender.try_send(item);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn depth(meters: f32) -> Message {
        Message::DepthBelowTransducer { meters }
    }

    #[tokio::test]
    async fn preserves_fifo_order_within_one_edge() {
        let queue = Queue::new(DEFAULT_CAPACITY, Duration::from_secs(30));
        let handle = queue.handle();
        for i in 0..10 {
            handle.enqueue(depth(i as f32)).await;
        }
        for i in 0..10 {
            assert_eq!(queue.recv_fresh().await, Some(depth(i as f32)));
        }
    }

    #[tokio::test]
    async fn overflow_head_drops_and_counts() {
        let queue = Queue::new(4, Duration::from_secs(30));
        let handle = queue.handle();
        for i in 0..10 {
            handle.enqueue(depth(i as f32)).await;
        }
        assert_eq!(queue.overflow_dropped(), 6);

        let mut remaining = Vec::new();
        while let Ok(msg) = tokio::time::timeout(
            Duration::from_millis(50),
            queue.recv_fresh(),
        )
        .await
        {
            match msg {
                Some(m) => remaining.push(m),
                None => break,
            }
        }
        assert_eq!(remaining.len(), 4);
        // the oldest 6 were dropped; the newest 4 survive in order
        assert_eq!(remaining, vec![depth(6.0), depth(7.0), depth(8.0), depth(9.0)]);
    }

    #[tokio::test]
    async fn expires_items_older_than_max_age() {
        let queue = Queue::new(DEFAULT_CAPACITY, Duration::from_millis(10));
        let handle = queue.handle();
        handle.enqueue(depth(1.0)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.enqueue(depth(2.0)).await;

        assert_eq!(queue.recv_fresh().await, Some(depth(2.0)));
        assert_eq!(queue.expired_dropped(), 1);
    }
}
