//! Handoff Channel
//!
//! Single-producer/single-consumer FIFO between a streaming run and the
//! response stream it feeds. Built on a tokio unbounded mpsc plus a shared
//! depth counter so the consumer can watch queue growth.
//!
//! The channel is unbounded: the engine pushes from inside its
//! event callbacks and must never block there. Depth is a diagnostic signal
//! only (see `ChatConfig::queue_warning_threshold`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::messages::FileInfo;

/// Item passed from a run to its consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    /// Text fragment
    Text(String),
    /// File artifact
    File(FileInfo),
    /// Failure description
    Error(String),
    /// Last item of every run
    EndOfStream,
}

impl StreamItem {
    /// Whether this is the end-of-stream sentinel
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Why a pop returned no item
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// Nothing arrived within the window
    #[error("no stream item within {0:?}")]
    TimedOut(Duration),
    /// Every sender is gone and the queue is empty
    #[error("handoff channel closed")]
    Closed,
}

/// Create a connected sender/receiver pair
#[must_use]
pub fn channel() -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        HandoffSender {
            tx,
            depth: Arc::clone(&depth),
        },
        HandoffReceiver { rx, depth },
    )
}

/// Producer half
#[derive(Clone, Debug)]
pub struct HandoffSender {
    tx: mpsc::UnboundedSender<StreamItem>,
    depth: Arc<AtomicUsize>,
}

impl HandoffSender {
    /// Enqueue an item without blocking
    ///
    /// Returns `false` when the consumer is gone; the item is dropped.
    pub fn push(&self, item: StreamItem) -> bool {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_ok() {
            true
        } else {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            tracing::trace!("Handoff consumer gone, dropping item");
            false
        }
    }

    /// Number of queued items
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Whether the consumer has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half
#[derive(Debug)]
pub struct HandoffReceiver {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    depth: Arc<AtomicUsize>,
}

impl HandoffReceiver {
    /// Wait up to `timeout` for the next item
    pub async fn pop_with_timeout(&mut self, timeout: Duration) -> Result<StreamItem, HandoffError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Ok(item)
            }
            Ok(None) => Err(HandoffError::Closed),
            Err(_) => Err(HandoffError::TimedOut(timeout)),
        }
    }

    /// Number of queued items
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Close the channel and discard everything still queued
    ///
    /// Returns the number of discarded items. Later pushes are dropped.
    pub fn drain_and_close(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            discarded += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel();
        tx.push(StreamItem::Text("a".to_string()));
        tx.push(StreamItem::Text("b".to_string()));
        tx.push(StreamItem::EndOfStream);

        let timeout = Duration::from_secs(1);
        assert_eq!(rx.pop_with_timeout(timeout).await, Ok(StreamItem::Text("a".to_string())));
        assert_eq!(rx.pop_with_timeout(timeout).await, Ok(StreamItem::Text("b".to_string())));
        assert_eq!(rx.pop_with_timeout(timeout).await, Ok(StreamItem::EndOfStream));
    }

    #[tokio::test]
    async fn test_depth_tracks_push_and_pop() {
        let (tx, mut rx) = channel();
        assert_eq!(tx.depth(), 0);

        for i in 0..3 {
            tx.push(StreamItem::Text(i.to_string()));
        }
        assert_eq!(tx.depth(), 3);
        assert_eq!(rx.depth(), 3);

        rx.pop_with_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(rx.depth(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_times_out() {
        let (_tx, mut rx) = channel();
        let result = rx.pop_with_timeout(Duration::from_secs(5)).await;
        assert_eq!(result, Err(HandoffError::TimedOut(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn test_pending_pop_wakes_on_push() {
        let (tx, mut rx) = channel();
        let mut pop = tokio_test::task::spawn(rx.pop_with_timeout(Duration::from_secs(60)));
        tokio_test::assert_pending!(pop.poll());

        tx.push(StreamItem::Text("x".to_string()));
        assert!(pop.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(pop.poll()),
            Ok(StreamItem::Text("x".to_string()))
        );
    }

    #[tokio::test]
    async fn test_pop_reports_closed() {
        let (tx, mut rx) = channel();
        tx.push(StreamItem::Text("last".to_string()));
        drop(tx);

        let timeout = Duration::from_secs(1);
        assert!(rx.pop_with_timeout(timeout).await.is_ok());
        assert_eq!(rx.pop_with_timeout(timeout).await, Err(HandoffError::Closed));
    }

    #[test]
    fn test_drain_and_close() {
        let (tx, mut rx) = channel();
        tx.push(StreamItem::Text("a".to_string()));
        tx.push(StreamItem::Error("b".to_string()));

        assert_eq!(rx.drain_and_close(), 2);
        assert_eq!(rx.depth(), 0);

        assert!(!tx.push(StreamItem::EndOfStream));
        assert!(tx.is_closed());
        assert_eq!(tx.depth(), 0);
        assert_eq!(rx.drain_and_close(), 0);
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(!tx.push(StreamItem::Text("orphan".to_string())));
        assert_eq!(tx.depth(), 0);
    }
}
