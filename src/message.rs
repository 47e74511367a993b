//! The admin message envelope and its collaborators.
//!
//! An [`AdminMessage`] carries the routing fields the broker needs
//! (source, destination and the broadcast flag) plus an opaque payload.
//! The envelope is serialised with [`serde`](https://serde.rs/) as one
//! flat JSON object; payload fields sit next to the routing fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BrokerError;
use crate::node::Node;

/// Payload field naming the message kind, used for logging only.
pub const KIND_FIELD: &str = "@class";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    /// Sender. Required; a message without one is rejected.
    #[serde(default)]
    pub source: Option<Node>,
    /// `None` broadcasts to every node.
    #[serde(default)]
    pub destination: Option<Node>,
    /// Lets the originator of a broadcast handle it too.
    #[serde(default)]
    pub broadcast_include_local_node: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl AdminMessage {
    pub fn broadcast(source: Node) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    pub fn unicast(source: Node, destination: Node) -> Self {
        Self {
            source: Some(source),
            destination: Some(destination),
            ..Default::default()
        }
    }

    pub fn include_local_node(mut self, include: bool) -> Self {
        self.broadcast_include_local_node = include;
        self
    }

    pub fn with_kind(self, kind: impl Into<String>) -> Self {
        self.with_field(KIND_FIELD, Value::String(kind.into()))
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Message kind for log lines.
    pub fn kind(&self) -> &str {
        self.payload
            .get(KIND_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("AdminMessage")
    }

    /// Source host for log lines.
    pub fn source_ip(&self) -> &str {
        self.source.as_ref().map(|n| n.ip.as_str()).unwrap_or("<none>")
    }
}

/// What a message does once delivered. Errors are logged by the router and
/// never reach the transport.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &AdminMessage) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&AdminMessage) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, message: &AdminMessage) -> anyhow::Result<()> {
        self(message)
    }
}

/// Converts envelopes to and from wire bytes.
pub trait EnvelopeCodec: Send + Sync {
    fn encode(&self, message: &AdminMessage) -> Result<Vec<u8>, BrokerError>;
    fn decode(&self, bytes: &[u8]) -> Result<AdminMessage, BrokerError>;
}

/// Stateless JSON codec.
///
/// Decoding also accepts a JSON string whose content is the envelope, the
/// double-encoded form some peers push.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, message: &AdminMessage) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(message).map_err(|e| BrokerError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<AdminMessage, BrokerError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| BrokerError::Decode(e.to_string()))?;
        let value = match value {
            Value::String(inner) => serde_json::from_str::<Value>(&inner)
                .map_err(|e| BrokerError::Decode(e.to_string()))?,
            other => other,
        };
        if !value.is_object() {
            return Err(BrokerError::Decode(format!(
                "expected a JSON object, got {}",
                value
            )));
        }
        serde_json::from_value(value).map_err(|e| BrokerError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_shape() {
        let msg = AdminMessage::broadcast(Node::new("10.0.0.1")).with_kind("InvalidateSpaceCache");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "source": {"ip": "10.0.0.1"},
                "destination": null,
                "broadcastIncludeLocalNode": false,
                "@class": "InvalidateSpaceCache"
            })
        );
    }

    #[test]
    fn decode_defaults_missing_routing_fields() {
        let msg = JsonCodec
            .decode(br#"{"source":{"ip":"10.0.0.9"},"spaceId":"abc"}"#)
            .unwrap();
        assert_eq!(msg.source, Some(Node::new("10.0.0.9")));
        assert!(msg.destination.is_none());
        assert!(!msg.broadcast_include_local_node);
        assert_eq!(msg.payload.get("spaceId"), Some(&json!("abc")));
    }

    #[test]
    fn decode_accepts_double_encoded_envelope() {
        let inner = r#"{"source":{"ip":"10.0.0.9"},"destination":{"ip":"10.0.0.1"}}"#;
        let outer = serde_json::to_vec(inner).unwrap();
        let msg = JsonCodec.decode(&outer).unwrap();
        assert_eq!(msg.destination, Some(Node::new("10.0.0.1")));
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(matches!(
            JsonCodec.decode(b"[1,2,3]"),
            Err(BrokerError::Decode(_))
        ));
        assert!(matches!(
            JsonCodec.decode(b"{not json"),
            Err(BrokerError::Decode(_))
        ));
    }

    #[test]
    fn kind_falls_back_to_envelope_name() {
        assert_eq!(AdminMessage::default().kind(), "AdminMessage");
        assert_eq!(AdminMessage::default().source_ip(), "<none>");
    }
}
