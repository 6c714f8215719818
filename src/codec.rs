//! Wire codec for the protocol's JSON text frames.
//!
//! Every frame is a JSON object tagged by its `msg` field. Outbound frames
//! are modelled by [`ClientMessage`], inbound ones by [`ServerMessage`];
//! both map onto the wire through serde's internally tagged representation.
//! Scalar values the wire format extends beyond plain JSON (dates, binary)
//! live in [`ejson`].

pub mod ejson;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: &str = "1";

/// Frames sent from client to server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Handshake request declaring the protocol version.
    Connect {
        version: String,
        support: Vec<String>,
    },
    /// Keepalive probe.
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Reply to a server-initiated ping.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Method invocation.
    Method {
        id: String,
        method: String,
        params: Vec<Value>,
    },
    /// Stream subscription request.
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },
    /// Stream subscription teardown.
    Unsub { id: String },
}

/// Frames received from the server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Handshake acknowledgement carrying the session identifier.
    Connected { session: String },
    /// Handshake rejection; `version` is the server's counter-proposal.
    Failed {
        #[serde(default)]
        version: Option<String>,
    },
    /// Server-initiated keepalive probe; must be answered immediately.
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
    /// Reply to a client ping.
    Pong {
        #[serde(default)]
        id: Option<String>,
    },
    /// Method call outcome.
    Result {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<MethodFailure>,
    },
    /// Subscription acknowledgement, listing the sub ids now live.
    Ready { subs: Vec<String> },
    /// Subscription rejection, or acknowledgement of an unsub for a
    /// subscription the server no longer knows.
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<MethodFailure>,
    },
    /// Data push: a document appeared in a collection.
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Value,
    },
    /// Data push: a document changed. Stream events arrive in this shape.
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Value,
    },
    /// Data push: a document disappeared from a collection.
    Removed { collection: String, id: String },
    /// Server signal that method side effects are fully applied.
    Updated { methods: Vec<String> },
}

impl ServerMessage {
    /// Wire tag of this frame.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Failed { .. } => "failed",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Result { .. } => "result",
            Self::Ready { .. } => "ready",
            Self::Nosub { .. } => "nosub",
            Self::Added { .. } => "added",
            Self::Changed { .. } => "changed",
            Self::Removed { .. } => "removed",
            Self::Updated { .. } => "updated",
        }
    }

    /// Correlation id carried by this frame, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Result { id, .. } | Self::Nosub { id, .. } => Some(id),
            Self::Ping { id } | Self::Pong { id } => id.as_deref(),
            _ => None,
        }
    }
}

/// Server-reported application error payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodFailure {
    /// Error code; a number or string depending on the server.
    #[serde(default)]
    pub error: Value,
    /// Human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Alternative message field some server versions populate instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl fmt::Display for MethodFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.reason {
            f.write_str(reason)
        } else if let Some(message) = &self.message {
            f.write_str(message)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

/// Serialize an outbound message into its text frame.
pub(crate) fn encode(message: &ClientMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

/// Decode a text frame into a protocol message.
///
/// Returns `None` for frames that are not protocol messages, such as the
/// `server_id` banner the server sends on connect.
pub(crate) fn decode(frame: &str) -> Option<ServerMessage> {
    match serde_json::from_str(frame) {
        Ok(message) => Some(message),
        Err(err) => {
            trace!(error = %err, frame, "ignoring non-protocol frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn connect_frame_carries_tag_and_version() {
        let frame = encode(&ClientMessage::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: vec![PROTOCOL_VERSION.to_string()],
        })
        .expect("serializable");
        let value: Value = serde_json::from_str(&frame).expect("valid json");
        assert_eq!(value, json!({ "msg": "connect", "version": "1", "support": ["1"] }));
    }

    #[test]
    fn ping_omits_absent_id() {
        let frame = encode(&ClientMessage::Ping { id: None }).expect("serializable");
        assert_eq!(frame, r#"{"msg":"ping"}"#);
    }

    #[test]
    fn result_frame_with_error_decodes() {
        let frame = r#"{"msg":"result","id":"7","error":{"error":403,"reason":"denied","errorType":"Meteor.Error"}}"#;
        let message = decode(frame).expect("protocol frame");
        let ServerMessage::Result { id, result, error } = message else {
            panic!("expected result frame, got {message:?}");
        };
        assert_eq!(id, "7");
        assert_eq!(result, None);
        let failure = error.expect("error payload");
        assert_eq!(failure.reason.as_deref(), Some("denied"));
        assert_eq!(failure.to_string(), "denied");
    }

    #[test]
    fn ready_frame_lists_sub_ids() {
        let message = decode(r#"{"msg":"ready","subs":["3","4"]}"#).expect("protocol frame");
        assert_eq!(
            message,
            ServerMessage::Ready {
                subs: vec!["3".to_string(), "4".to_string()]
            }
        );
    }

    #[test]
    fn changed_frame_keeps_fields_verbatim() {
        let frame = r#"{"msg":"changed","collection":"stream-room-messages","id":"id","fields":{"eventName":"GENERAL","args":[]}}"#;
        let message = decode(frame).expect("protocol frame");
        let ServerMessage::Changed { collection, fields, .. } = message else {
            panic!("expected changed frame, got {message:?}");
        };
        assert_eq!(collection, "stream-room-messages");
        assert_eq!(fields["eventName"], "GENERAL");
    }

    #[test]
    fn server_banner_is_not_a_protocol_frame() {
        assert_eq!(decode(r#"{"server_id":"0"}"#), None);
    }

    #[test]
    fn method_failure_falls_back_to_error_code() {
        let failure = MethodFailure {
            error: json!(403),
            ..MethodFailure::default()
        };
        assert_eq!(failure.to_string(), "403");
    }
}
