//! Bounded edges between stages.
//!
//! An edge carries batches followed by exactly one terminal frame: `End` on
//! a clean finish, `Abort` when the producer stopped early. Capacity is
//! counted in frames; a full edge suspends the producer.

use tl_error::StageKind;
use tl_types::{Batch, BatchId};
use tokio::sync::mpsc;
use tracing::trace;

/// Why a stream ended before its natural end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The pipeline was cancelled from outside
    Cancelled,

    /// A stage failed with a fatal error
    UpstreamFailed(StageKind),

    /// A downstream stage stopped receiving
    DownstreamClosed,

    /// The producer went away without a terminal frame
    Disconnected,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::UpstreamFailed(stage) => write!(f, "{} stage failed", stage),
            Self::DownstreamClosed => write!(f, "downstream closed"),
            Self::Disconnected => write!(f, "upstream disconnected"),
        }
    }
}

/// A unit travelling along an edge.
#[derive(Debug)]
pub enum Frame {
    Batch(Batch),
    End,
    Abort(AbortReason),
}

/// The receiving stage has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeClosed;

impl std::fmt::Display for EdgeClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "edge closed")
    }
}

/// Creates an edge holding at most `capacity` frames.
pub fn edge(capacity: usize) -> (EdgeSender, EdgeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EdgeSender {
            tx,
            last_id: None,
        },
        EdgeReceiver { rx },
    )
}

/// Producer half of an edge.
#[derive(Debug)]
pub struct EdgeSender {
    tx: mpsc::Sender<Frame>,
    last_id: Option<BatchId>,
}

impl EdgeSender {
    /// Sends a batch, waiting while the edge is full.
    pub async fn send_batch(&mut self, batch: Batch) -> Result<(), EdgeClosed> {
        debug_assert!(
            self.last_id.is_none_or(|last| batch.id > last),
            "batch {} sent after {:?}",
            batch.id,
            self.last_id
        );
        self.last_id = Some(batch.id);

        trace!(batch_id = batch.id, items = batch.len(), "Sending batch");
        self.tx.send(Frame::Batch(batch)).await.map_err(|_| EdgeClosed)
    }

    /// Closes the edge cleanly.
    pub async fn end(self) {
        // a closed receiver has already stopped caring
        let _ = self.tx.send(Frame::End).await;
    }

    /// Closes the edge, telling the consumer why.
    pub async fn abort(self, reason: AbortReason) {
        let _ = self.tx.send(Frame::Abort(reason)).await;
    }

    /// Returns true if the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of an edge.
#[derive(Debug)]
pub struct EdgeReceiver {
    rx: mpsc::Receiver<Frame>,
}

impl EdgeReceiver {
    /// Receives the next frame.
    ///
    /// A producer that disappears without a terminal frame (for example a
    /// panicked task) is reported as `Abort(Disconnected)`.
    pub async fn recv(&mut self) -> Frame {
        self.rx
            .recv()
            .await
            .unwrap_or(Frame::Abort(AbortReason::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (mut tx, mut rx) = edge(4);

        tx.send_batch(Batch::records(0, Vec::new())).await.unwrap();
        tx.send_batch(Batch::records(1, Vec::new())).await.unwrap();
        tx.end().await;

        assert!(matches!(rx.recv().await, Frame::Batch(b) if b.id == 0));
        assert!(matches!(rx.recv().await, Frame::Batch(b) if b.id == 1));
        assert!(matches!(rx.recv().await, Frame::End));
    }

    #[tokio::test]
    async fn test_dropped_sender_is_disconnected() {
        let (tx, mut rx) = edge(1);
        drop(tx);

        assert!(matches!(
            rx.recv().await,
            Frame::Abort(AbortReason::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_fails() {
        let (mut tx, rx) = edge(1);
        drop(rx);

        assert!(tx.is_closed());
        let result = tx.send_batch(Batch::records(0, Vec::new())).await;
        assert_eq!(result, Err(EdgeClosed));
    }

    #[tokio::test]
    async fn test_full_edge_blocks_producer() {
        let (mut tx, mut rx) = edge(1);
        tx.send_batch(Batch::records(0, Vec::new())).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            tx.send_batch(Batch::records(1, Vec::new())),
        )
        .await;
        assert!(blocked.is_err(), "send should wait while the edge is full");

        assert!(matches!(rx.recv().await, Frame::Batch(b) if b.id == 0));
    }

    #[tokio::test]
    async fn test_abort_carries_reason() {
        let (tx, mut rx) = edge(1);
        tx.abort(AbortReason::UpstreamFailed(StageKind::Infer)).await;

        assert!(matches!(
            rx.recv().await,
            Frame::Abort(AbortReason::UpstreamFailed(StageKind::Infer))
        ));
    }
}
