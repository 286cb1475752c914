//! The bounded single-writer work queue (§5): every capture input submits
//! raw frames here; one task drains it, builds a [`Packet`], dissects, and
//! feeds [`crate::storage::Storage`]. When full, the oldest pending item is
//! dropped rather than blocking the producer, so a live capture never
//! stalls behind a slow writer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::dissect::link::Dlt;
use crate::packet::{Frame, ProtocolId};

/// One pending frame, tagged with where it entered the pipeline.
pub struct WorkItem {
    pub input: String,
    pub root: ProtocolId,
    pub dlt: Dlt,
    pub frame: Frame,
}

struct Shared {
    items: Mutex<VecDeque<WorkItem>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Producer handle. Cheaply cloneable; every capture input task gets one.
#[derive(Clone)]
pub struct WorkQueueSender(Arc<Shared>);

/// The single consumer handle, held by [`crate::engine::CaptureEngine`]'s
/// writer loop.
pub struct WorkQueueReceiver(Arc<Shared>);

/// Build a bounded queue of the given capacity.
pub fn channel(capacity: usize) -> (WorkQueueSender, WorkQueueReceiver) {
    let shared = Arc::new(Shared {
        items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        capacity,
        notify: Notify::new(),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });
    (WorkQueueSender(shared.clone()), WorkQueueReceiver(shared))
}

impl WorkQueueSender {
    /// Enqueue an item, dropping the oldest pending one if already at
    /// capacity.
    pub async fn send(&self, item: WorkItem) {
        let mut items = self.0.items.lock().await;
        if items.len() >= self.0.capacity {
            items.pop_front();
            self.0.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(item);
        drop(items);
        self.0.notify.notify_one();
    }

    /// Total items dropped so far due to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.0.dropped.load(Ordering::Relaxed)
    }

    /// Signal the receiver that no more items will arrive once the queue
    /// drains.
    pub fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }
}

impl WorkQueueReceiver {
    /// Wait for the next item, or `None` once the queue is closed and
    /// empty.
    pub async fn recv(&mut self) -> Option<WorkItem> {
        loop {
            {
                let mut items = self.0.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
                if self.0.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.0.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drops_oldest_when_full() {
        let (tx, mut rx) = channel(2);
        for i in 0..3u64 {
            tx.send(WorkItem {
                input: "t".to_string(),
                root: ProtocolId::Link,
                dlt: Dlt::Raw,
                frame: Frame::new(i, vec![i as u8]),
            })
            .await;
        }
        assert_eq!(tx.dropped_count(), 1);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.frame.bytes[0], 1);
    }

    #[tokio::test]
    async fn recv_returns_none_after_close_and_drain() {
        let (tx, mut rx) = channel(4);
        tx.send(WorkItem {
            input: "t".to_string(),
            root: ProtocolId::Link,
            dlt: Dlt::Raw,
            frame: Frame::new(1, vec![1]),
        })
        .await;
        tx.close();
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
