//! Connection management: handshake sequencing, the frame event loop, and
//! reconnection with bounded exponential backoff.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;

use crate::Error;
use crate::protocol::{
    Classified, Frame, build_hello, build_ping, build_sub, classify, encode_frame, frame_type,
};
use crate::session::SessionIdentity;
use crate::types::{Event, TimingConfig};

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) type WsRead = futures_util::stream::SplitStream<WsStream>;
pub(crate) type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

// ---------------------------------------------------------------------------
// Connection phase
// ---------------------------------------------------------------------------

/// Protocol phase of one connection. Owned exclusively by the event loop;
/// the transport never reads or writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Connecting,
    AwaitingHelloAck,
    Subscribing,
    Active,
    Closed,
}

// ---------------------------------------------------------------------------
// Endpoint validation and connect helpers
// ---------------------------------------------------------------------------

pub(crate) fn validate_endpoint(endpoint: &str) -> Result<String, Error> {
    let url = url::Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url.to_string()),
        other => Err(Error::Handshake(format!(
            "unsupported endpoint scheme: {other}"
        ))),
    }
}

async fn connect_and_split(url: &str) -> Result<(WsWrite, WsRead), Error> {
    let (ws, _resp) = tokio_tungstenite::connect_async(url).await?;
    Ok(ws.split())
}

async fn send_frame(ws_write: &mut WsWrite, frame: &Frame) -> Result<(), Error> {
    let encoded = encode_frame(frame)?;
    ws_write
        .send(tungstenite::Message::Text(encoded.into()))
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handshake acknowledgement waits
// ---------------------------------------------------------------------------

/// Wait for an acknowledgement frame of type `expect`.
///
/// Error frames and undecodable payloads are surfaced to the caller's event
/// stream without advancing the handshake; other recognized frame types are
/// out of phase here and are dropped.
async fn wait_for_ack(
    ws_read: &mut WsRead,
    event_tx: &mpsc::Sender<Event>,
    expect: &str,
) -> Result<(), Error> {
    while let Some(frame) = ws_read.next().await {
        let frame = frame?;
        let tungstenite::Message::Text(text) = frame else {
            continue;
        };
        match classify(text.as_str()) {
            Classified::Error(raw) => {
                let _ = event_tx.try_send(Event::ProtocolError { frame: raw });
            }
            Classified::Malformed(raw) => {
                let _ = event_tx.try_send(Event::DecodeError { raw });
            }
            Classified::Frame { frame, raw } => {
                if frame.frame_type == expect {
                    return Ok(());
                }
                match frame.frame_type.as_str() {
                    frame_type::HELLO | frame_type::SUB | frame_type::PING | frame_type::PUB => {
                        tracing::debug!(
                            frame_type = %frame.frame_type,
                            "ignoring out-of-phase frame during handshake"
                        );
                    }
                    _ => {
                        let _ = event_tx.try_send(Event::Unexpected { frame: raw });
                    }
                }
            }
        }
    }
    Err(Error::Handshake(format!(
        "connection closed before {expect} acknowledgement"
    )))
}

// ---------------------------------------------------------------------------
// Connect + handshake + subscribe (used by the subscribe entry point and by
// reconnection)
// ---------------------------------------------------------------------------

/// Run the full connection sequence: open the socket, present the credential
/// in `hello`, then subscribe the device topic. The handshake is strictly
/// sequential; the relay rejects out-of-order control frames.
pub(crate) async fn connect_and_subscribe(
    endpoint: &str,
    identity: &SessionIdentity,
    timing: &TimingConfig,
    event_tx: &mpsc::Sender<Event>,
) -> Result<(WsWrite, WsRead), Error> {
    tracing::debug!(phase = ?Phase::Connecting, endpoint, "connecting");
    let url = validate_endpoint(endpoint)?;
    let (mut ws_write, mut ws_read) = connect_and_split(&url).await?;

    let hello = build_hello(&identity.client_id, &identity.credential);
    send_frame(&mut ws_write, &hello).await?;
    tracing::debug!(phase = ?Phase::AwaitingHelloAck, client_id = %identity.client_id, "hello sent");
    tokio::time::timeout(
        timing.handshake_timeout,
        wait_for_ack(&mut ws_read, event_tx, frame_type::HELLO),
    )
    .await
    .map_err(|_| Error::Timeout("hello handshake"))??;

    let sub = build_sub(&identity.client_id, &identity.device_id, &identity.topic);
    send_frame(&mut ws_write, &sub).await?;
    tracing::debug!(phase = ?Phase::Subscribing, device_id = %identity.device_id, "sub sent");
    tokio::time::timeout(
        timing.handshake_timeout,
        wait_for_ack(&mut ws_read, event_tx, frame_type::SUB),
    )
    .await
    .map_err(|_| Error::Timeout("subscribe handshake"))??;

    tracing::debug!(phase = ?Phase::Active, "subscription established");
    Ok((ws_write, ws_read))
}

// ---------------------------------------------------------------------------
// Caller commands
// ---------------------------------------------------------------------------

pub(crate) enum Command {
    /// Raw text frame send. Acknowledged once written to the socket, or
    /// rejected with `Error::NotConnected` while reconnecting.
    Send {
        text: String,
        ack: oneshot::Sender<Result<(), Error>>,
    },
    /// Re-subscription trigger; replaces the session's device/topic target.
    Resubscribe {
        device_id: String,
        topic: String,
        ack: oneshot::Sender<Result<(), Error>>,
    },
    /// Idempotent teardown.
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

pub(crate) struct EventLoopState {
    pub ws_read: WsRead,
    pub ws_write: WsWrite,
    pub event_tx: mpsc::Sender<Event>,
    pub phase: Phase,
    pub identity: SessionIdentity,
    pub endpoint: String,
    pub timing: TimingConfig,
    pub dropped_events: u64,
}

enum LoopAction {
    Continue,
    Stop,
    Reconnect,
}

pub(crate) async fn run_event_loop(mut p: EventLoopState, mut command_rx: mpsc::Receiver<Command>) {
    let mut retry_count: u32 = 0;

    'outer: loop {
        let mut disconnect_reason: Option<String> = None;

        // Main frame processing loop. Frames are handled strictly in receipt
        // order; a new frame is only considered after the previous one's
        // handling (including any resulting send) completes.
        loop {
            let idle_timeout = p.timing.max_idle_interval + p.timing.heartbeat_margin;
            let idle_deadline = Instant::now() + idle_timeout;

            tokio::select! {
                frame = p.ws_read.next() => {
                    match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            retry_count = 0;
                            match handle_frame(&mut p, text.as_str()).await {
                                LoopAction::Stop => {
                                    p.phase = Phase::Closed;
                                    return;
                                }
                                LoopAction::Reconnect => break,
                                LoopAction::Continue => {}
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(cf))) => {
                            tracing::info!("server closed connection");
                            disconnect_reason = cf.map(|f| f.reason.as_str().to_string());
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, ping, pong frames
                        }
                        Some(Err(e)) => {
                            tracing::warn!("WebSocket error: {e}");
                            disconnect_reason = Some(e.to_string());
                            break;
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            break;
                        }
                    }
                }

                cmd = command_rx.recv() => {
                    match cmd {
                        Some(cmd) => match handle_command(&mut p, cmd).await {
                            LoopAction::Stop => return,
                            LoopAction::Reconnect => break,
                            LoopAction::Continue => {}
                        },
                        None => {
                            // Subscription dropped without an explicit close.
                            close_connection(&mut p, None, None).await;
                            return;
                        }
                    }
                }

                _ = tokio::time::sleep_until(idle_deadline) => {
                    tracing::warn!("liveness timeout, no frames from relay");
                    disconnect_reason = Some("liveness timeout".to_string());
                    break;
                }
            }
        }

        // --- Reconnection ---
        p.phase = Phase::Connecting;
        if p.event_tx
            .send(Event::Disconnected {
                reason: disconnect_reason,
            })
            .await
            .is_err()
        {
            return;
        }

        loop {
            retry_count += 1;
            if retry_count > p.timing.max_retry_attempts {
                let _ = p
                    .event_tx
                    .send(Event::Fatal {
                        message: format!(
                            "connection failed after {} attempts",
                            p.timing.max_retry_attempts
                        ),
                    })
                    .await;
                p.phase = Phase::Closed;
                return;
            }

            // Exponential backoff: 1s, 2s, 4s, 8s, 15s, 15s, ...
            let exp = retry_count.saturating_sub(1).min(30);
            let backoff = p
                .timing
                .initial_retry_interval
                .saturating_mul(1u32 << exp)
                .min(p.timing.max_retry_interval);
            // Use subsecond nanos from wall clock for non-deterministic jitter
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            let jitter = Duration::from_millis(nanos % 1000);
            let wake_at = Instant::now() + backoff + jitter;

            // Backoff wait. Commands are still serviced: sends fail fast
            // with NotConnected, close aborts the retry loop.
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake_at) => break,
                    cmd = command_rx.recv() => match cmd {
                        Some(Command::Send { ack, .. }) => {
                            let _ = ack.send(Err(Error::NotConnected));
                        }
                        Some(Command::Resubscribe { device_id, topic, ack }) => {
                            p.identity.retarget(device_id, topic);
                            let _ = ack.send(Ok(()));
                        }
                        Some(Command::Close { code, reason }) => {
                            tracing::info!("close requested during reconnect");
                            p.phase = Phase::Closed;
                            let _ = p.event_tx.send(Event::Closed { code, reason }).await;
                            return;
                        }
                        None => {
                            p.phase = Phase::Closed;
                            return;
                        }
                    }
                }
            }

            match tokio::time::timeout(p.timing.reconnect_timeout, attempt_reconnect(&mut p)).await
            {
                Ok(Ok(())) => {
                    retry_count = 0;
                    p.phase = Phase::Active;
                    if p.event_tx.send(Event::Connected).await.is_err() {
                        return;
                    }
                    continue 'outer;
                }
                Ok(Err(e)) => {
                    tracing::warn!("reconnect attempt {retry_count} failed: {e}");
                }
                Err(_) => {
                    tracing::warn!("reconnect attempt {retry_count} timed out");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame dispatch
// ---------------------------------------------------------------------------

async fn handle_frame(p: &mut EventLoopState, text: &str) -> LoopAction {
    let (frame, raw) = match classify(text) {
        Classified::Error(raw) => {
            // Error detection wins over type dispatch; the phase does not
            // advance and subsequent frames keep flowing.
            return emit_frame_event(p, Event::ProtocolError { frame: raw });
        }
        Classified::Malformed(raw) => {
            tracing::warn!("failed to decode inbound frame");
            return emit_frame_event(p, Event::DecodeError { raw });
        }
        Classified::Frame { frame, raw } => (frame, raw),
    };

    match frame.frame_type.as_str() {
        frame_type::PING => {
            if p.phase != Phase::Active {
                tracing::debug!(phase = ?p.phase, "ignoring ping outside active phase");
                return LoopAction::Continue;
            }
            tracing::trace!("liveness probe received");
            let pong = build_ping(&p.identity.client_id);
            match send_frame(&mut p.ws_write, &pong).await {
                Ok(()) => LoopAction::Continue,
                Err(e) => {
                    tracing::warn!("failed to answer liveness probe: {e}");
                    LoopAction::Reconnect
                }
            }
        }
        frame_type::PUB => {
            if p.phase != Phase::Active {
                tracing::debug!(phase = ?p.phase, "ignoring pub outside active phase");
                return LoopAction::Continue;
            }
            match frame.message {
                Some(message) => emit_frame_event(p, Event::Publish(message)),
                None => {
                    tracing::warn!("pub frame without message");
                    emit_frame_event(
                        p,
                        Event::DecodeError {
                            raw: text.to_string(),
                        },
                    )
                }
            }
        }
        frame_type::SUB => {
            if p.phase == Phase::Subscribing {
                p.phase = Phase::Active;
                tracing::info!(
                    device_id = %p.identity.device_id,
                    "re-subscription acknowledged"
                );
            } else {
                tracing::debug!("ignoring redundant sub acknowledgement");
            }
            LoopAction::Continue
        }
        frame_type::HELLO => {
            tracing::debug!("ignoring redundant hello acknowledgement");
            LoopAction::Continue
        }
        other => {
            tracing::debug!(frame_type = other, "unrecognized frame type");
            emit_frame_event(p, Event::Unexpected { frame: raw })
        }
    }
}

/// Forward a frame-scoped event without blocking the loop. If the consumer
/// falls behind, frame events are dropped rather than stalling liveness
/// probe handling; connectivity events elsewhere use `.send().await` because
/// they must not be lost.
fn emit_frame_event(p: &mut EventLoopState, event: Event) -> LoopAction {
    match p.event_tx.try_send(event) {
        Ok(()) => LoopAction::Continue,
        Err(mpsc::error::TrySendError::Full(_)) => {
            p.dropped_events += 1;
            tracing::warn!(
                total_dropped = p.dropped_events,
                "event channel full, dropping frame event"
            );
            LoopAction::Continue
        }
        Err(mpsc::error::TrySendError::Closed(_)) => LoopAction::Stop,
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

async fn handle_command(p: &mut EventLoopState, cmd: Command) -> LoopAction {
    match cmd {
        Command::Send { text, ack } => {
            let result = p
                .ws_write
                .send(tungstenite::Message::Text(text.into()))
                .await;
            match result {
                Ok(()) => {
                    let _ = ack.send(Ok(()));
                    LoopAction::Continue
                }
                Err(e) => {
                    tracing::warn!("send failed: {e}");
                    let _ = ack.send(Err(e.into()));
                    LoopAction::Reconnect
                }
            }
        }
        Command::Resubscribe {
            device_id,
            topic,
            ack,
        } => {
            p.identity.retarget(device_id, topic);
            let sub = build_sub(
                &p.identity.client_id,
                &p.identity.device_id,
                &p.identity.topic,
            );
            match send_frame(&mut p.ws_write, &sub).await {
                Ok(()) => {
                    p.phase = Phase::Subscribing;
                    let _ = ack.send(Ok(()));
                    LoopAction::Continue
                }
                Err(e) => {
                    tracing::warn!("re-subscription send failed: {e}");
                    let _ = ack.send(Err(e));
                    LoopAction::Reconnect
                }
            }
        }
        Command::Close { code, reason } => {
            close_connection(p, code, reason).await;
            LoopAction::Stop
        }
    }
}

/// Release the socket exactly once and surface the closure. Never treated as
/// an error.
async fn close_connection(p: &mut EventLoopState, code: Option<u16>, reason: Option<String>) {
    tracing::info!(?code, "close requested");
    let close_frame = code.map(|c| tungstenite::protocol::CloseFrame {
        code: tungstenite::protocol::frame::coding::CloseCode::from(c),
        reason: reason.clone().unwrap_or_default().into(),
    });
    let _ = p
        .ws_write
        .send(tungstenite::Message::Close(close_frame))
        .await;
    p.phase = Phase::Closed;
    let _ = p.event_tx.send(Event::Closed { code, reason }).await;
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

/// Attempt a single reconnect. Callers are responsible for applying an outer
/// timeout (`reconnect_timeout`).
///
/// The client id is regenerated for every attempt; the relay sees each
/// attempt as a fresh session. Socket halves are only swapped in after the
/// full handshake succeeds.
async fn attempt_reconnect(p: &mut EventLoopState) -> Result<(), Error> {
    p.identity.rotate_client_id();
    let (ws_write, ws_read) =
        connect_and_subscribe(&p.endpoint, &p.identity, &p.timing, &p.event_tx).await?;
    p.ws_write = ws_write;
    p.ws_read = ws_read;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
