pub mod actor;
pub mod handler;
pub mod protocol;

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};

use crate::proto::Frame;

/// Process-unique identity of one client socket.
pub type ConnectionId = u64;

/// Sender half of a client's outbound queue. Owned by the client's room;
/// dropping it is how the room tells the writer to close the socket.
///
/// Besides the bounded frame queue it carries a one-shot close notice, so a
/// closure reason still reaches the client when the queue itself is full.
#[derive(Debug)]
pub struct OutboundSender {
    frames: mpsc::Sender<Frame>,
    close_notice: oneshot::Sender<Frame>,
}

impl OutboundSender {
    /// Queue a frame without waiting. Fails if the queue is full or the writer is gone.
    pub fn try_send(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.frames.try_send(frame)
    }

    /// Close the queue, leaving `notice` to be written after any frames already queued.
    pub fn close_with(self, notice: Frame) {
        let _ = self.close_notice.send(notice);
    }
}

/// Receiver half of a client's outbound queue, drained by the writer task.
#[derive(Debug)]
pub struct OutboundReceiver {
    frames: mpsc::Receiver<Frame>,
    close_notice: oneshot::Receiver<Frame>,
}

impl OutboundReceiver {
    /// Next queued frame; `None` once the sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        self.frames.try_recv()
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    /// The closure reason, if the room sent one before closing the queue.
    pub fn take_close_notice(&mut self) -> Option<Frame> {
        self.close_notice.try_recv().ok()
    }
}

/// Create a bounded outbound queue for one client.
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (frames_tx, frames_rx) = mpsc::channel(capacity);
    let (notice_tx, notice_rx) = oneshot::channel();
    (
        OutboundSender {
            frames: frames_tx,
            close_notice: notice_tx,
        },
        OutboundReceiver {
            frames: frames_rx,
            close_notice: notice_rx,
        },
    )
}

/// Allocate the next connection ID.
pub fn next_connection_id() -> ConnectionId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
