//! Per-session outbound queue.
//!
//! Many producers (the hub, the session's broker handler, the inbound pump)
//! push text payloads; the outbound pump is the only consumer. Producers
//! never wait: a full queue is reported to the caller, which evicts the
//! session. Closing the queue lets the consumer drain what is already
//! buffered and then observe the end of the stream.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a payload could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The queue has been closed.
    #[error("outbound queue closed")]
    Closed,
}

/// Producer side of a session's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
}

/// Consumer side of a session's outbound queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<String>,
    closed: CancellationToken,
}

/// Create a bounded outbound queue.
#[must_use]
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        OutboundQueue {
            tx,
            closed: closed.clone(),
        },
        OutboundReceiver { rx, closed },
    )
}

impl OutboundQueue {
    /// Enqueue a payload without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] when the queue is at capacity and
    /// [`EnqueueError::Closed`] once the queue has been closed.
    pub fn try_enqueue(&self, payload: impl Into<String>) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(payload.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the queue. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

impl OutboundReceiver {
    /// Wait for the next payload.
    ///
    /// Returns `None` once the queue is closed and every buffered payload
    /// has been received.
    pub async fn recv(&mut self) -> Option<String> {
        if !self.closed.is_cancelled() {
            tokio::select! {
                biased;
                item = self.rx.recv() => return item,
                () = self.closed.cancelled() => {}
            }
        }

        self.rx.close();
        self.rx.recv().await
    }

    /// Take every payload that is ready right now.
    pub fn drain_ready(&mut self) -> Vec<String> {
        let mut ready = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            ready.push(item);
        }
        ready
    }
}
