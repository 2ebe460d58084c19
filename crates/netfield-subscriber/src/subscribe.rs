//! Public entry point: [`subscribe`] and [`Subscription`].

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::connection::{Command, EventLoopState, Phase, connect_and_subscribe, run_event_loop};
use crate::session::SessionIdentity;
use crate::types::{Error, Event, SubscribeConfig};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Handle to a running subscription.
///
/// Call [`next`](Subscription::next) to receive events. Frame events may be
/// dropped under backpressure if the consumer falls behind.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    cmd_tx: mpsc::Sender<Command>,
    closed: bool,
}

impl Subscription {
    /// Receive the next event. Returns `None` once the background task has
    /// exited (after a [`Event::Closed`] or [`Event::Fatal`]).
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Send a raw text frame. Fails with [`Error::NotConnected`] while the
    /// transport is down rather than silently discarding the frame.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                text: text.into(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        ack_rx.await.map_err(|_| Error::Closed)?
    }

    /// JSON-encode `value` and send it as one text frame.
    pub async fn send_object<T: Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let text = serde_json::to_string(value)?;
        self.send(text).await
    }

    /// Re-subscribe, replacing the session's device/topic target. The `sub`
    /// frame goes out immediately when connected, or with the next
    /// reconnection attempt otherwise.
    pub async fn resubscribe(
        &mut self,
        device_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Resubscribe {
                device_id: device_id.into(),
                topic: topic.into(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        ack_rx.await.map_err(|_| Error::Closed)?
    }

    /// Gracefully close the connection. Idempotent: repeated calls are
    /// no-ops and the transport is closed at most once.
    pub fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.cmd_tx.try_send(Command::Close { code, reason });
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.cmd_tx.try_send(Command::Close {
                code: None,
                reason: None,
            });
        }
    }
}

/// Subscribe to a device topic on the relay.
///
/// Establishes the WebSocket connection, presents the credential in `hello`,
/// subscribes the base64-encoded topic path, and returns a [`Subscription`]
/// that yields [`Event`]s.
///
/// The background task answers liveness probes and automatically reconnects
/// with bounded exponential backoff, regenerating the client id per attempt.
pub async fn subscribe(config: SubscribeConfig) -> Result<Subscription, Error> {
    let timing = config.timing.unwrap_or_default();
    let (event_tx, event_rx) = mpsc::channel::<Event>(timing.event_channel_capacity);
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(COMMAND_CHANNEL_CAPACITY);

    let identity = SessionIdentity::new(config.device_id, config.topic, config.credential);

    // Initial connect + handshake + subscribe, bounded as a whole
    let (ws_write, ws_read) = tokio::time::timeout(
        timing.connect_timeout,
        connect_and_subscribe(&config.endpoint, &identity, &timing, &event_tx),
    )
    .await
    .map_err(|_| Error::Timeout("connect"))??;

    let _ = event_tx.send(Event::Connected).await;

    // Spawn background event loop
    tokio::spawn(run_event_loop(
        EventLoopState {
            ws_read,
            ws_write,
            event_tx,
            phase: Phase::Active,
            identity,
            endpoint: config.endpoint,
            timing,
            dropped_events: 0,
        },
        cmd_rx,
    ));

    Ok(Subscription {
        rx: event_rx,
        cmd_tx,
        closed: false,
    })
}
