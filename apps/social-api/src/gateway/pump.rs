//! Writer half of a connection: drains the outbound queue onto the socket.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::connection::{Connection, OutboundFrame};

/// Normal closure, sent when the connection is torn down from our side.
const CLOSE_NORMAL: u16 = 1000;

/// Drops typing indicators written too soon after the previous frame.
///
/// The interval is measured from the last frame of any type that was
/// successfully written.
#[derive(Debug)]
pub struct TypingThrottle {
    interval: Duration,
    last_written: Option<Instant>,
}

impl TypingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_written: None,
        }
    }

    pub fn admits(&self, frame: &OutboundFrame, now: Instant) -> bool {
        if !frame.throttled {
            return true;
        }
        match self.last_written {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn record_write(&mut self, now: Instant) {
        self.last_written = Some(now);
    }
}

/// Write queued frames in FIFO order until the connection closes, the queue
/// ends, or a write fails. Any exit closes the connection so the reader stops
/// too.
pub async fn run<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<OutboundFrame>,
    conn: Arc<Connection>,
    mut throttle: TypingThrottle,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = conn.closed() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let now = Instant::now();
        if !throttle.admits(&frame, now) {
            tracing::trace!(conn_id = %conn.id, "typing frame throttled");
            continue;
        }
        if let Err(err) = sink.send(Message::Text(frame.text)).await {
            tracing::debug!(conn_id = %conn.id, error = %err, "socket write failed");
            conn.close();
            return;
        }
        throttle.record_write(now);
    }

    conn.close();
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_NORMAL,
            reason: String::new().into(),
        })))
        .await;
}
