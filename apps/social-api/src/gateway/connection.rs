use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use social_common::id::prefix;
use social_common::prefixed_ulid;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::events::ServerFrame;

/// An encoded frame waiting in a connection's outbound queue.
///
/// The text is reference counted, so cloning a frame for every recipient of a
/// broadcast does not copy the payload.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub text: Utf8Bytes,
    /// Typing indicators are subject to the pump's throttle.
    pub throttled: bool,
}

impl OutboundFrame {
    pub fn encode(frame: &ServerFrame) -> Option<Self> {
        match serde_json::to_string(frame) {
            Ok(text) => Some(Self {
                text: text.into(),
                throttled: frame.is_throttled(),
            }),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode server frame");
                None
            }
        }
    }

    /// Wraps an arbitrary JSON payload. Throttling is decided from its `type`.
    pub fn from_json(payload: &Value) -> Option<Self> {
        let throttled = matches!(
            payload.get("type").and_then(Value::as_str),
            Some("typing" | "stop_typing")
        );
        match serde_json::to_string(payload) {
            Ok(text) => Some(Self {
                text: text.into(),
                throttled,
            }),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode json payload");
                None
            }
        }
    }
}

/// Outcome of [`Connection::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted into the queue immediately.
    Queued,
    /// Queue was full, or earlier frames are still waiting for room. The frame
    /// is held in order behind them until its enqueue timeout.
    Deferred,
    /// The connection is gone; the frame was dropped.
    Closed,
}

/// Frames waiting for room in the outbound queue, oldest first, each with
/// the instant past which it is dropped.
type Overflow = Arc<Mutex<VecDeque<(Instant, OutboundFrame)>>>;

/// One live socket of an authenticated user.
///
/// Owns the sending half of the bounded outbound queue and the close signal
/// shared by the reader and the writer.
pub struct Connection {
    pub id: String,
    pub user_id: i64,
    pub nickname: String,
    tx: mpsc::Sender<OutboundFrame>,
    /// Non-empty exactly while a drain task is running.
    overflow: Overflow,
    closed: CancellationToken,
    enqueue_timeout: Duration,
}

impl Connection {
    pub fn new(
        user_id: i64,
        nickname: impl Into<String>,
        capacity: usize,
        enqueue_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: prefixed_ulid(prefix::CONNECTION),
            user_id,
            nickname: nickname.into(),
            tx,
            overflow: Arc::default(),
            closed: CancellationToken::new(),
            enqueue_timeout,
        });
        (conn, rx)
    }

    /// Enqueue a frame without blocking the caller.
    ///
    /// Once the queue is full, this frame and every later one wait in an
    /// overflow list drained by a single task, so frames reach the queue in
    /// the order they were delivered. A frame still waiting after the enqueue
    /// timeout is dropped.
    pub fn deliver(&self, frame: OutboundFrame) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        let mut overflow = self.overflow.lock();
        if !overflow.is_empty() {
            overflow.push_back((Instant::now() + self.enqueue_timeout, frame));
            return Delivery::Deferred;
        }
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
            Err(TrySendError::Full(frame)) => {
                overflow.push_back((Instant::now() + self.enqueue_timeout, frame));
                drop(overflow);
                tokio::spawn(drain_overflow(
                    self.tx.clone(),
                    self.overflow.clone(),
                    self.id.clone(),
                ));
                Delivery::Deferred
            }
        }
    }

    pub fn send(&self, frame: &ServerFrame) -> Delivery {
        match OutboundFrame::encode(frame) {
            Some(out) => self.deliver(out),
            None => Delivery::Closed,
        }
    }

    /// Signal both halves of the connection to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

/// Moves overflow frames into the queue as room appears. Exits, with the
/// overflow lock held, as soon as the overflow is empty.
async fn drain_overflow(tx: mpsc::Sender<OutboundFrame>, overflow: Overflow, conn_id: String) {
    loop {
        let deadline = {
            let mut pending = overflow.lock();
            let now = Instant::now();
            while pending.front().is_some_and(|(deadline, _)| *deadline <= now) {
                pending.pop_front();
                tracing::warn!(conn_id = %conn_id, "outbound queue full, frame dropped");
            }
            match pending.front() {
                Some((deadline, _)) => *deadline,
                None => return,
            }
        };

        match tokio::time::timeout_at(deadline, tx.reserve()).await {
            Ok(Ok(permit)) => {
                let mut pending = overflow.lock();
                if let Some((_, frame)) = pending.pop_front() {
                    permit.send(frame);
                }
                if pending.is_empty() {
                    return;
                }
            }
            Ok(Err(_)) => {
                let mut pending = overflow.lock();
                tracing::debug!(
                    conn_id = %conn_id,
                    dropped = pending.len(),
                    "queue closed before deferred send"
                );
                pending.clear();
                return;
            }
            // The front frame expired; the next pass drops it.
            Err(_) => {}
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n_of(frame: &OutboundFrame) -> u64 {
        let value: Value = serde_json::from_str(frame.text.as_str()).unwrap();
        value["n"].as_u64().unwrap()
    }

    fn frame(n: u32) -> OutboundFrame {
        OutboundFrame::from_json(&serde_json::json!({ "type": "message", "n": n })).unwrap()
    }

    #[tokio::test]
    async fn deliver_queues_until_full_then_defers() {
        let (conn, mut rx) = Connection::new(1, "amy", 1, Duration::from_millis(200));
        assert_eq!(conn.deliver(frame(1)), Delivery::Queued);
        assert_eq!(conn.deliver(frame(2)), Delivery::Deferred);

        // Draining makes room for the deferred frame.
        assert_eq!(n_of(&rx.recv().await.unwrap()), 1);
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n_of(&second), 2);
    }

    #[tokio::test]
    async fn frames_behind_a_deferred_one_keep_their_order() {
        let (conn, mut rx) = Connection::new(1, "amy", 1, Duration::from_millis(200));
        assert_eq!(conn.deliver(frame(1)), Delivery::Queued);
        assert_eq!(conn.deliver(frame(2)), Delivery::Deferred);
        assert_eq!(n_of(&rx.recv().await.unwrap()), 1);
        conn.deliver(frame(3));
        conn.deliver(frame(4));

        let mut received = Vec::new();
        while received.len() < 3 {
            let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(n_of(&next));
        }
        assert_eq!(received, [2, 3, 4]);
    }

    #[tokio::test]
    async fn deferred_frame_is_dropped_after_timeout() {
        let (conn, mut rx) = Connection::new(1, "amy", 1, Duration::from_millis(20));
        conn.deliver(frame(1));
        assert_eq!(conn.deliver(frame(2)), Delivery::Deferred);
        assert_eq!(conn.deliver(frame(3)), Delivery::Deferred);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(n_of(&rx.recv().await.unwrap()), 1);
        assert!(rx.try_recv().is_err());

        // The overflow is empty again, so the next frame goes straight in.
        assert_eq!(conn.deliver(frame(4)), Delivery::Queued);
        assert_eq!(n_of(&rx.recv().await.unwrap()), 4);
    }

    #[tokio::test]
    async fn closed_connection_rejects_frames() {
        let (conn, _rx) = Connection::new(1, "amy", 4, Duration::from_millis(20));
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.deliver(frame(1)), Delivery::Closed);
    }

    #[test]
    fn typing_payloads_are_throttled() {
        let typing = OutboundFrame::from_json(&serde_json::json!({ "type": "typing" })).unwrap();
        assert!(typing.throttled);
        assert!(!frame(1).throttled);
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _) = Connection::new(1, "amy", 1, Duration::ZERO);
        let (b, _) = Connection::new(1, "amy", 1, Duration::ZERO);
        assert!(a.id.starts_with("conn_"));
        assert_ne!(a.id, b.id);
    }
}
