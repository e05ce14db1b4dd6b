//! Writes agent events into the live response channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::protocol::StreamEvent;

/// How long the closing events may wait for a reader that stopped draining.
pub const DEFAULT_CLOSING_GRACE: Duration = Duration::from_secs(5);

/// Frames events and pushes them to the HTTP response body.
///
/// A failed send means the client went away: the publisher closes itself and
/// cancels the session token so the agent loop stops at its next checkpoint.
pub struct Publisher {
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    closed: AtomicBool,
    done: AtomicBool,
}

impl Publisher {
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let publisher = Self {
            tx,
            cancel,
            closed: AtomicBool::new(false),
            done: AtomicBool::new(false),
        };
        (publisher, rx)
    }

    /// Deliver one event. Returns whether it reached the channel.
    pub async fn publish(&self, event: StreamEvent) -> bool {
        if event.is_done() {
            return self.finish().await;
        }
        if self.done.load(Ordering::SeqCst) {
            debug!(kind = event.kind(), "dropping event published after done");
            return false;
        }
        self.write(&event).await
    }

    /// Terminate the stream. Only the first call writes `done`.
    pub async fn finish(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.write(&StreamEvent::Done).await
    }

    /// Write the closing events: `error`, if any, then `done`. A reader that
    /// makes no room within `grace` is treated as gone and the stream is
    /// abandoned without `done`.
    pub async fn conclude(&self, error: Option<StreamEvent>, grace: Duration) -> bool {
        let closing = async move {
            if let Some(error) = error {
                self.publish(error).await;
            }
            self.finish().await
        };

        match tokio::time::timeout(grace, closing).await {
            Ok(written) => written,
            Err(_) => {
                self.abandon("client stopped reading");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn write(&self, event: &StreamEvent) -> bool {
        if self.is_closed() {
            return false;
        }

        let frame = match codec::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = event.kind(), error = %e, "failed to encode event");
                return false;
            }
        };

        if self.tx.send(frame).await.is_err() {
            self.abandon("client disconnected");
            return false;
        }
        true
    }

    fn abandon(&self, reason: &str) {
        self.done.store(true, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(reason, "closing stream, cancelling session");
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameDecoder;

    fn decode_all(rx: &mut mpsc::Receiver<Bytes>) -> Vec<StreamEvent> {
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.extend(decoder.push(&frame));
        }
        events
    }

    #[tokio::test]
    async fn done_is_written_once_and_nothing_follows() {
        let (publisher, mut rx) = Publisher::channel(8, CancellationToken::new());

        assert!(publisher.publish(StreamEvent::text("hello")).await);
        assert!(publisher.finish().await);
        assert!(!publisher.publish(StreamEvent::Done).await);
        assert!(!publisher.publish(StreamEvent::text("late")).await);
        assert!(!publisher.finish().await);

        assert_eq!(
            decode_all(&mut rx),
            vec![StreamEvent::text("hello"), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn closed_receiver_cancels_session_and_drops_writes() {
        let cancel = CancellationToken::new();
        let (publisher, rx) = Publisher::channel(8, cancel.clone());
        drop(rx);

        assert!(!publisher.publish(StreamEvent::text("lost")).await);
        assert!(publisher.is_closed());
        assert!(cancel.is_cancelled());

        assert!(!publisher.publish(StreamEvent::error("also lost")).await);
        assert!(!publisher.finish().await);
    }

    #[tokio::test]
    async fn conclude_writes_error_then_done() {
        let (publisher, mut rx) = Publisher::channel(4, CancellationToken::new());

        let error = Some(StreamEvent::error("session timed out after 5 s"));
        assert!(publisher.conclude(error, DEFAULT_CLOSING_GRACE).await);

        assert_eq!(
            decode_all(&mut rx),
            vec![
                StreamEvent::error("session timed out after 5 s"),
                StreamEvent::Done
            ]
        );
        assert!(!publisher.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reader_is_abandoned_after_grace() {
        let cancel = CancellationToken::new();
        let (publisher, mut rx) = Publisher::channel(1, cancel.clone());
        assert!(publisher.publish(StreamEvent::text("unread")).await);

        let error = Some(StreamEvent::error("late"));
        assert!(!publisher.conclude(error, Duration::from_secs(5)).await);

        assert!(publisher.is_closed());
        assert!(cancel.is_cancelled());
        assert!(!publisher.finish().await);
        assert!(!publisher.publish(StreamEvent::text("after")).await);
        assert_eq!(decode_all(&mut rx), vec![StreamEvent::text("unread")]);
    }

    #[tokio::test]
    async fn send_waits_for_capacity() {
        let (publisher, mut rx) = Publisher::channel(1, CancellationToken::new());
        assert!(publisher.publish(StreamEvent::text("first")).await);

        let second = publisher.publish(StreamEvent::text("second"));
        tokio::pin!(second);
        assert!(futures::poll!(second.as_mut()).is_pending());

        assert!(rx.recv().await.is_some());
        assert!(second.await);
        assert!(rx.recv().await.is_some());
    }
}
