//! Relay wire protocol: frame types, outbound construction, and inbound
//! classification. Frames are JSON text on the wire.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Protocol version literal sent in every `hello` frame.
pub const PROTOCOL_VERSION: &str = "2";

/// Recognized values of a frame's `type` field.
pub mod frame_type {
    pub const HELLO: &str = "hello";
    pub const SUB: &str = "sub";
    pub const PING: &str = "ping";
    pub const PUB: &str = "pub";
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A decoded protocol frame.
///
/// Outbound frames carry only the fields the spec of the relay requires for
/// the given `type`; `skip_serializing_if` keeps absent fields off the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<PublishMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthDetails {
    pub headers: AuthHeaders,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthHeaders {
    pub authorization: String,
}

/// A message received on the subscribed topic, carried by inbound `pub` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct PublishMessage {
    /// Server publish time, epoch milliseconds.
    pub created_at: i64,
    /// Plaintext topic the message was published on.
    pub topic: String,
    /// Message content.
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Outbound frame construction
// ---------------------------------------------------------------------------

/// Subscription path for a device-scoped topic. The topic travels only in
/// base64 form, never in plaintext.
pub fn subscription_path(device_id: &str, topic: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(topic);
    format!("/devices/{device_id}/netfieldproxy/{encoded}")
}

pub fn build_hello(client_id: &str, credential: &str) -> Frame {
    Frame {
        frame_type: frame_type::HELLO.to_string(),
        id: Some(client_id.to_string()),
        version: Some(PROTOCOL_VERSION.to_string()),
        auth: Some(AuthDetails {
            headers: AuthHeaders {
                authorization: credential.to_string(),
            },
        }),
        ..Default::default()
    }
}

pub fn build_sub(client_id: &str, device_id: &str, topic: &str) -> Frame {
    Frame {
        frame_type: frame_type::SUB.to_string(),
        id: Some(client_id.to_string()),
        path: Some(subscription_path(device_id, topic)),
        ..Default::default()
    }
}

pub fn build_ping(client_id: &str) -> Frame {
    Frame {
        frame_type: frame_type::PING.to_string(),
        id: Some(client_id.to_string()),
        ..Default::default()
    }
}

pub fn encode_frame(frame: &Frame) -> Result<String, Error> {
    Ok(serde_json::to_string(frame)?)
}

// ---------------------------------------------------------------------------
// Inbound classification
// ---------------------------------------------------------------------------

/// Outcome of classifying one inbound text frame.
#[derive(Debug)]
pub enum Classified {
    /// Frame carries a non-empty `payload.error`. Error detection takes
    /// precedence over type dispatch.
    Error(serde_json::Value),
    /// Payload is not well-formed JSON, or does not fit the frame shape.
    Malformed(String),
    /// Structurally valid frame; the raw value is retained so unexpected
    /// types can be surfaced verbatim.
    Frame {
        frame: Frame,
        raw: serde_json::Value,
    },
}

pub fn classify(text: &str) -> Classified {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Classified::Malformed(text.to_string()),
    };
    if payload_error(&raw).is_some() {
        return Classified::Error(raw);
    }
    match serde_json::from_value::<Frame>(raw.clone()) {
        Ok(frame) => Classified::Frame { frame, raw },
        Err(_) => Classified::Malformed(text.to_string()),
    }
}

/// Returns the `payload.error` value when it is present and truthy.
///
/// Truthiness follows the wire producer's conventions: `null`, `false`, `0`,
/// and `""` do not count as errors; everything else (including empty objects
/// and arrays) does.
pub fn payload_error(frame: &serde_json::Value) -> Option<&serde_json::Value> {
    let err = frame.get("payload")?.get("error")?;
    let truthy = match err {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    };
    truthy.then_some(err)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_frame_exact_shape() {
        let frame = build_hello("client-1", "secret-token");
        let json: serde_json::Value =
            serde_json::from_str(&encode_frame(&frame).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "hello",
                "id": "client-1",
                "version": "2",
                "auth": {"headers": {"authorization": "secret-token"}},
            })
        );
    }

    #[test]
    fn sub_frame_path_is_base64_encoded() {
        let frame = build_sub("client-1", "D1", "/t");
        let json: serde_json::Value =
            serde_json::from_str(&encode_frame(&frame).unwrap()).unwrap();
        let expected_path = format!(
            "/devices/D1/netfieldproxy/{}",
            base64::engine::general_purpose::STANDARD.encode("/t")
        );
        assert_eq!(
            json,
            serde_json::json!({
                "type": "sub",
                "id": "client-1",
                "path": expected_path,
            })
        );
    }

    #[test]
    fn ping_frame_carries_only_type_and_id() {
        let frame = build_ping("client-9");
        let json: serde_json::Value =
            serde_json::from_str(&encode_frame(&frame).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ping", "id": "client-9"}));
    }

    #[test]
    fn subscription_path_never_contains_plaintext_topic() {
        let path = subscription_path("dev", "secret/topic");
        assert!(!path.contains("secret/topic"));
        assert!(path.starts_with("/devices/dev/netfieldproxy/"));
    }

    #[test]
    fn classify_decodes_pub_frame() {
        let text = r#"{"type":"pub","message":{"createdAt":1,"topic":"/t","data":"x"}}"#;
        match classify(text) {
            Classified::Frame { frame, .. } => {
                assert_eq!(frame.frame_type, frame_type::PUB);
                let msg = frame.message.unwrap();
                assert_eq!(msg.created_at, 1);
                assert_eq!(msg.topic, "/t");
                assert_eq!(msg.data, serde_json::json!("x"));
            }
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[test]
    fn classify_error_wins_over_type() {
        let text = r#"{"type":"pub","payload":{"error":"bad"},"message":{"topic":"/t"}}"#;
        match classify(text) {
            Classified::Error(raw) => {
                assert_eq!(raw["payload"]["error"], serde_json::json!("bad"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn classify_malformed_json() {
        assert!(matches!(classify("not json"), Classified::Malformed(_)));
    }

    #[test]
    fn classify_malformed_frame_shape() {
        // type is a number, not a string
        assert!(matches!(classify(r#"{"type":3}"#), Classified::Malformed(_)));
    }

    #[test]
    fn payload_error_truthiness() {
        let truthy = [
            serde_json::json!({"payload": {"error": "boom"}}),
            serde_json::json!({"payload": {"error": true}}),
            serde_json::json!({"payload": {"error": 1}}),
            serde_json::json!({"payload": {"error": {}}}),
            serde_json::json!({"payload": {"error": []}}),
        ];
        for frame in &truthy {
            assert!(payload_error(frame).is_some(), "expected error in {frame}");
        }

        let falsy = [
            serde_json::json!({"payload": {"error": null}}),
            serde_json::json!({"payload": {"error": false}}),
            serde_json::json!({"payload": {"error": ""}}),
            serde_json::json!({"payload": {"error": 0}}),
            serde_json::json!({"payload": {}}),
            serde_json::json!({"type": "pub"}),
        ];
        for frame in &falsy {
            assert!(payload_error(frame).is_none(), "unexpected error in {frame}");
        }
    }
}
