//! Callback-style event sink: four optional handler slots, each defaulting
//! to a logging action. Injected configuration, never a process-wide
//! singleton; callers that prefer the stream style use
//! [`Subscription::next`](crate::Subscription::next) directly.

use crate::protocol::PublishMessage;
use crate::subscribe::Subscription;
use crate::types::Event;

/// Error detail handed to the sink's error handler.
#[derive(Debug)]
pub enum ErrorDetail {
    /// Inbound frame carrying a non-empty `payload.error`, verbatim.
    Frame(serde_json::Value),
    /// Inbound payload that could not be decoded.
    Malformed(String),
    /// Reconnection gave up; the subscription is over.
    Fatal(String),
}

type PublishHandler = Box<dyn FnMut(PublishMessage) + Send>;
type ErrorHandler = Box<dyn FnMut(ErrorDetail) + Send>;
type ClosedHandler = Box<dyn FnMut(Option<u16>, Option<&str>) + Send>;
type UnexpectedHandler = Box<dyn FnMut(&serde_json::Value) + Send>;

/// The set of callbacks a subscription invokes. Unset slots log instead.
#[derive(Default)]
pub struct EventSink {
    pub on_publish: Option<PublishHandler>,
    pub on_error: Option<ErrorHandler>,
    pub on_closed: Option<ClosedHandler>,
    pub on_unexpected: Option<UnexpectedHandler>,
}

impl EventSink {
    /// Route one event to its handler slot. Connectivity notifications
    /// (`Connected`, `Disconnected`) have no slot and are logged.
    pub fn dispatch(&mut self, event: Event) {
        match event {
            Event::Publish(message) => match self.on_publish.as_mut() {
                Some(handler) => handler(message),
                None => tracing::info!(topic = %message.topic, "publish received"),
            },
            Event::ProtocolError { frame } => self.dispatch_error(ErrorDetail::Frame(frame)),
            Event::DecodeError { raw } => self.dispatch_error(ErrorDetail::Malformed(raw)),
            Event::Fatal { message } => self.dispatch_error(ErrorDetail::Fatal(message)),
            Event::Unexpected { frame } => match self.on_unexpected.as_mut() {
                Some(handler) => handler(&frame),
                None => tracing::warn!(%frame, "unexpected frame"),
            },
            Event::Closed { code, reason } => match self.on_closed.as_mut() {
                Some(handler) => handler(code, reason.as_deref()),
                None => tracing::info!(?code, ?reason, "connection closed"),
            },
            Event::Connected => tracing::info!("connected"),
            Event::Disconnected { reason } => tracing::warn!(?reason, "disconnected"),
        }
    }

    fn dispatch_error(&mut self, detail: ErrorDetail) {
        match self.on_error.as_mut() {
            Some(handler) => handler(detail),
            None => tracing::error!(?detail, "subscription error"),
        }
    }
}

/// Drain a subscription's event stream into a sink until it ends.
pub async fn drive(mut subscription: Subscription, mut sink: EventSink) {
    while let Some(event) = subscription.next().await {
        sink.dispatch(event);
    }
}
