//! Outbound side of a client connection.
//!
//! Every connection gets a bounded queue drained by its own writer task. The
//! session hub only ever `try_send`s into it, so a viewer that stops reading
//! fills its own queue and gets disconnected instead of stalling the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chorale_rpc::protocol::{CloseReason, Message};
use tokio::sync::{Notify, mpsc};

use crate::session::ConnectionId;

#[derive(Debug)]
pub enum Outbound {
    Message(Message),
    /// Send a `closed` notification; the writer stops afterwards if the reason
    /// ends the connection.
    Close(CloseReason),
}

/// Whether the daemon hangs up after telling the client why.
#[must_use]
pub fn closes_socket(reason: CloseReason) -> bool {
    matches!(
        reason,
        CloseReason::ReplacedByNewOperator | CloseReason::SlowConsumer
    )
}

/// Cloneable sender half of a connection, handed to session hubs.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    kicked: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(id: ConnectionId, buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id,
            tx,
            kicked: Arc::new(Notify::new()),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }

    /// Queue a message without waiting.
    ///
    /// Returns `false` if the queue is full or the connection is gone. A full
    /// queue also kicks the connection.
    pub fn send(&self, outbound: Outbound) -> bool {
        match self.tx.try_send(outbound) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.kicked.notify_one();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_message(&self, message: Message) -> bool {
        self.send(Outbound::Message(message))
    }

    /// Queue a message, waiting for room. Used for replies to the connection's
    /// own requests, which must not be dropped.
    pub async fn send_reply(&self, message: Message) -> bool {
        self.tx.send(Outbound::Message(message)).await.is_ok()
    }

    /// Notified once the connection is kicked for overflowing its queue.
    #[must_use]
    pub fn kick_signal(&self) -> Arc<Notify> {
        self.kicked.clone()
    }

    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
