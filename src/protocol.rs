//! # Control Wire Protocol
//!
//! JSON text messages exchanged with the command endpoint.
//!
//! ## Message Format:
//! - **Relay → Server**: `{"op": "skip", "data": null, "postback": "42"}`.
//!   `postback` is always a string; a missing correlation token is sent as `"None"`.
//! - **Server → Relay (handshake)**: `{"type": "hello", "key": "abc123"}`
//! - **Server → Relay (everything else)**: `{"type": "...", "data": ..., "postback": 42 | "42"}`

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wire spelling of a missing correlation token.
pub const NO_POSTBACK: &str = "None";

const HELLO: &str = "hello";

/// A command produced by the front-end, transmitted once by the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub op: String,
    pub data: Option<Value>,
    /// Correlation token echoed back by the server in its response
    pub postback: Option<i64>,
}

impl CommandRecord {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            data: None,
            postback: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_postback(mut self, postback: i64) -> Self {
        self.postback = Some(postback);
        self
    }

    pub fn to_frame(&self) -> ControlFrame<'_> {
        ControlFrame {
            op: &self.op,
            data: self.data.as_ref(),
            postback: self
                .postback
                .map(|token| token.to_string())
                .unwrap_or_else(|| NO_POSTBACK.to_string()),
        }
    }

    /// Serialized text frame for the control websocket.
    pub fn encode(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(&self.to_frame())?)
    }
}

/// Outbound wire shape of a [`CommandRecord`].
#[derive(Debug, Serialize)]
pub struct ControlFrame<'a> {
    pub op: &'a str,
    pub data: Option<&'a Value>,
    pub postback: String,
}

/// Response types the music server is known to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    Search,
    ListQueue,
    State,
    Playlists,
    Playlist,
    Token,
    PlayerStateChange,
    QueueChange,
    PlaylistsChange,
    PlaylistEntryChange,
    Other(String),
}

impl ResponseKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "search" => ResponseKind::Search,
            "list_queue" => ResponseKind::ListQueue,
            "state" => ResponseKind::State,
            "playlists" => ResponseKind::Playlists,
            "playlist" => ResponseKind::Playlist,
            "token" => ResponseKind::Token,
            "event_player_state_change" => ResponseKind::PlayerStateChange,
            "event_queue_change" => ResponseKind::QueueChange,
            "event_playlists_change" => ResponseKind::PlaylistsChange,
            "event_playlist_entry_change" => ResponseKind::PlaylistEntryChange,
            other => ResponseKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResponseKind::Search => "search",
            ResponseKind::ListQueue => "list_queue",
            ResponseKind::State => "state",
            ResponseKind::Playlists => "playlists",
            ResponseKind::Playlist => "playlist",
            ResponseKind::Token => "token",
            ResponseKind::PlayerStateChange => "event_player_state_change",
            ResponseKind::QueueChange => "event_queue_change",
            ResponseKind::PlaylistsChange => "event_playlists_change",
            ResponseKind::PlaylistEntryChange => "event_playlist_entry_change",
            ResponseKind::Other(tag) => tag,
        }
    }

    /// Server-initiated events, as opposed to replies to a command.
    pub fn is_event(&self) -> bool {
        self.as_str().starts_with("event_")
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed inbound message handed to the front-end dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub kind: ResponseKind,
    pub data: Value,
    pub postback: Option<i64>,
}

/// Everything the control receive loop can get from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Hello { key: String },
    Response(ResponseRecord),
}

/// Decode one inbound text message.
///
/// Only structural problems are errors. A correlation token that is not an
/// integer is dropped rather than failing the whole message.
pub fn parse_inbound(text: &str) -> RelayResult<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    let mut object = match value {
        Value::Object(object) => object,
        other => {
            return Err(RelayError::Protocol(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            )))
        }
    };

    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if tag == HELLO {
        return match object.remove("key") {
            Some(Value::String(key)) => Ok(Inbound::Hello { key }),
            _ => Err(RelayError::Protocol("hello message without a string key".to_string())),
        };
    }

    let postback = object.get("postback").and_then(coerce_postback);
    Ok(Inbound::Response(ResponseRecord {
        kind: ResponseKind::parse(&tag),
        data: object.remove("data").unwrap_or(Value::Null),
        postback,
    }))
}

fn coerce_postback(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_encoding_with_postback() {
        let record = CommandRecord::new("skip").with_postback(42);
        let wire: Value = serde_json::from_str(&record.encode().unwrap()).unwrap();
        assert_eq!(wire, json!({"op": "skip", "data": null, "postback": "42"}));
    }

    #[test]
    fn test_command_encoding_without_postback() {
        let record = CommandRecord::new("play").with_data(json!({"query": "lofi"}));
        let wire: Value = serde_json::from_str(&record.encode().unwrap()).unwrap();
        assert_eq!(
            wire,
            json!({"op": "play", "data": {"query": "lofi"}, "postback": "None"})
        );
    }

    #[test]
    fn test_parse_hello() {
        let inbound = parse_inbound(r#"{"type": "hello", "key": "abc123"}"#).unwrap();
        assert_eq!(inbound, Inbound::Hello { key: "abc123".to_string() });
    }

    #[test]
    fn test_hello_without_key_is_rejected() {
        assert!(parse_inbound(r#"{"type": "hello"}"#).is_err());
    }

    #[test]
    fn test_postback_coercion() {
        let cases = [
            (r#"{"type":"state","data":{},"postback":"42"}"#, Some(42)),
            (r#"{"type":"state","data":{},"postback":42}"#, Some(42)),
            (r#"{"type":"state","data":{},"postback":"None"}"#, None),
            (r#"{"type":"state","data":{},"postback":"channel-7"}"#, None),
            (r#"{"type":"state","data":{}}"#, None),
        ];
        for (text, expected) in cases {
            match parse_inbound(text).unwrap() {
                Inbound::Response(record) => assert_eq!(record.postback, expected, "{}", text),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_response_kinds() {
        let inbound = parse_inbound(r#"{"type":"event_queue_change","data":[1,2]}"#).unwrap();
        let Inbound::Response(record) = inbound else { panic!("expected response") };
        assert_eq!(record.kind, ResponseKind::QueueChange);
        assert!(record.kind.is_event());
        assert_eq!(record.data, json!([1, 2]));

        assert_eq!(ResponseKind::parse("brand_new"), ResponseKind::Other("brand_new".to_string()));
        assert_eq!(ResponseKind::parse("search").to_string(), "search");
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(parse_inbound("not json"), Err(RelayError::Protocol(_))));
        assert!(matches!(parse_inbound("[1, 2, 3]"), Err(RelayError::Protocol(_))));
    }
}
