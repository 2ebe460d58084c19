//! Subscribe-only client for the netfield device message relay.
//!
//! Implements the relay's connection protocol over WebSocket with JSON text
//! frames: `hello` handshake with a bearer credential, single device-scoped
//! topic subscription (`sub`), liveness probe responses (`ping`), and
//! asynchronous publish delivery (`pub`).
//!
//! # Features
//! - Strictly sequenced handshake (`hello` before `sub` before any `pub`)
//! - Liveness probe responses and idle-connection detection
//! - Automatic reconnection with bounded exponential backoff, regenerating
//!   the client id per attempt
//! - Error frames (`payload.error`) surfaced without dropping the connection
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), netfield_subscriber::Error> {
//! use netfield_subscriber::{Event, SubscribeConfig};
//!
//! let config = SubscribeConfig::new(
//!     "wss://relay.example",
//!     std::env::var("RELAY_CREDENTIAL").unwrap_or_default(),
//!     "device-1",
//!     "/sensors/temp",
//! );
//!
//! let mut sub = netfield_subscriber::subscribe(config).await?;
//! while let Some(event) = sub.next().await {
//!     match event {
//!         Event::Publish(msg) => println!("got: {} on {}", msg.data, msg.topic),
//!         Event::Connected => println!("connected"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod connection;
pub mod protocol;
mod session;
mod sink;
mod subscribe;
mod types;

pub use protocol::PublishMessage;
pub use sink::{ErrorDetail, EventSink, drive};
pub use subscribe::{Subscription, subscribe};
pub use types::{Error, Event, SubscribeConfig, TimingConfig};
