//! Bounded, best-effort hand-off from notification writes to live connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::gateway::connection::OutboundFrame;
use crate::gateway::registry::ConnectionRegistry;

/// A realtime copy of a notification addressed to one user.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub recipient_id: i64,
    pub frame: OutboundFrame,
}

/// Producer side of the bus. Publishing never waits: when the channel is
/// full the new message is dropped.
#[derive(Clone)]
pub struct NotificationBus {
    tx: mpsc::Sender<BusMessage>,
    dropped: Arc<AtomicU64>,
}

impl NotificationBus {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bus = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (bus, rx)
    }

    /// Returns whether the message was accepted.
    pub fn publish(&self, message: BusMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    recipient_id = message.recipient_id,
                    "notification bus full, realtime copy dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("notification bus closed");
                false
            }
        }
    }

    /// Messages dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain the bus, delivering each message to its recipient's live connection.
/// Ends when every producer has been dropped.
pub fn spawn_forwarder(
    mut rx: mpsc::Receiver<BusMessage>,
    registry: Arc<ConnectionRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Some(conn) = registry.get(message.recipient_id) {
                conn.deliver(message.frame);
            }
        }
        tracing::debug!("notification forwarder stopped");
    })
}
