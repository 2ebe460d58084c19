//! Public types for the netfield-subscriber crate.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

use crate::protocol::PublishMessage;

/// Events emitted by a [`Subscription`](crate::Subscription).
#[derive(Debug)]
pub enum Event {
    /// A message was received on the subscribed topic.
    Publish(PublishMessage),
    /// Successfully connected (or reconnected), handshake and subscription
    /// complete.
    Connected,
    /// Connection lost; the client will attempt to reconnect.
    Disconnected { reason: Option<String> },
    /// An inbound frame carried a non-empty `payload.error`. The connection
    /// stays up; the raw frame is surfaced verbatim.
    ProtocolError { frame: serde_json::Value },
    /// An inbound payload could not be decoded. The connection stays up.
    DecodeError { raw: String },
    /// An inbound frame of unrecognized type. Not necessarily fatal.
    Unexpected { frame: serde_json::Value },
    /// The connection was closed by caller request. Terminal.
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// Reconnection gave up after the configured retry budget. Terminal.
    Fatal { message: String },
}

/// Configuration for [`subscribe`](crate::subscribe).
#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    /// Relay endpoint URI (`ws://` or `wss://`).
    pub endpoint: String,
    /// Opaque bearer credential, presented once per connection in `hello`.
    pub credential: String,
    /// Device whose topic space is subscribed.
    pub device_id: String,
    /// Topic to subscribe to. Transmitted only base64-encoded.
    pub topic: String,
    /// Timeout and retry tuning. `None` uses [`TimingConfig::default`].
    pub timing: Option<TimingConfig>,
}

impl SubscribeConfig {
    pub fn new(
        endpoint: impl Into<String>,
        credential: impl Into<String>,
        device_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: credential.into(),
            device_id: device_id.into(),
            topic: topic.into(),
            timing: None,
        }
    }
}

/// Timeouts and retry policy for one subscription.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Bound on the initial connect + handshake sequence.
    pub connect_timeout: Duration,
    /// Bound on each of the hello and sub acknowledgement waits.
    pub handshake_timeout: Duration,
    /// Longest silence tolerated from the relay before the connection is
    /// considered dead.
    pub max_idle_interval: Duration,
    /// Slack added to `max_idle_interval` before declaring the connection dead.
    pub heartbeat_margin: Duration,
    /// First reconnect backoff delay; doubles each attempt.
    pub initial_retry_interval: Duration,
    /// Backoff cap.
    pub max_retry_interval: Duration,
    /// Bound on a single reconnect attempt.
    pub reconnect_timeout: Duration,
    /// Consecutive failed reconnect attempts tolerated before giving up.
    pub max_retry_attempts: u32,
    /// Capacity of the event channel handed to the caller.
    pub event_channel_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            max_idle_interval: Duration::from_secs(60),
            heartbeat_margin: Duration::from_secs(10),
            initial_retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(15),
            reconnect_timeout: Duration::from_secs(60),
            max_retry_attempts: 40,
            event_channel_capacity: 64,
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("not connected")]
    NotConnected,

    #[error("subscription closed")]
    Closed,
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_defaults_are_bounded() {
        let t = TimingConfig::default();
        assert!(t.initial_retry_interval <= t.max_retry_interval);
        assert!(t.handshake_timeout <= t.connect_timeout);
        assert!(t.max_retry_attempts > 0);
        assert!(t.event_channel_capacity > 0);
    }

    #[test]
    fn config_new_leaves_timing_unset() {
        let c = SubscribeConfig::new("wss://relay.example", "tok", "D1", "/t");
        assert!(c.timing.is_none());
        assert_eq!(c.device_id, "D1");
        assert_eq!(c.topic, "/t");
    }
}
