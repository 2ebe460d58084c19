//! Subscribe to a device topic on a netfield relay.
//!
//! ```sh
//! cargo run -p netfield-subscriber --example subscribe -- <ENDPOINT> <DEVICE_ID> <TOPIC>
//! ```
//!
//! The credential is read from the `RELAY_CREDENTIAL` environment variable.
//! Message data is printed to stdout (pipe to `jq` for formatting).

use netfield_subscriber::{Event, SubscribeConfig, subscribe};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().ok_or("usage: subscribe <ENDPOINT> <DEVICE_ID> <TOPIC>")?;
    let device_id = args.next().ok_or("missing DEVICE_ID")?;
    let topic = args.next().ok_or("missing TOPIC")?;
    let credential =
        std::env::var("RELAY_CREDENTIAL").map_err(|_| "RELAY_CREDENTIAL is not set")?;

    let config = SubscribeConfig::new(endpoint, credential, device_id, topic);
    let mut sub = subscribe(config).await?;

    while let Some(event) = sub.next().await {
        match event {
            Event::Publish(msg) => {
                println!("{}", serde_json::json!({
                    "createdAt": msg.created_at,
                    "topic": msg.topic,
                    "data": msg.data,
                }));
            }
            Event::Connected => eprintln!("connected"),
            Event::Disconnected { reason } => eprintln!("disconnected: {reason:?}"),
            Event::ProtocolError { frame } => eprintln!("relay error: {frame}"),
            Event::DecodeError { raw } => eprintln!("undecodable frame: {raw}"),
            Event::Unexpected { frame } => eprintln!("unexpected frame: {frame}"),
            Event::Closed { code, reason } => {
                eprintln!("closed: {code:?} {reason:?}");
                break;
            }
            Event::Fatal { message } => {
                eprintln!("fatal: {message}");
                break;
            }
        }
    }

    Ok(())
}
