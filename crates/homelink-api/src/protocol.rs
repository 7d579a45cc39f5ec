//! Wire protocol spoken over the agent WebSocket.
//!
//! Every frame is a JSON text message with a `type` discriminator. The
//! agent sends [`ClientMessage`]s and receives [`ServerMessage`]s; both
//! directions are `Serialize + Deserialize` so test peers can speak the
//! other side of the conversation.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::Error;

/// Version advertised in the `auth` handshake.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Client → server ──────────────────────────────────────────────────

/// Messages the agent sends to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake. Must be the first frame on every connection.
    Auth {
        #[serde(serialize_with = "expose_token", deserialize_with = "secret_token")]
        token: SecretString,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_version: Option<String>,
    },

    /// Outcome of one command.
    Result(ResultFrame),

    /// Complete inventory, sent once per session right after `auth_ok`.
    InventoryFull { entities: Vec<EntityRecord> },

    /// Incremental inventory change since the previous push.
    InventoryDiff {
        added: Vec<EntityRecord>,
        removed: Vec<String>,
        changed: Vec<EntityRecord>,
    },

    Ping,
    Pong,
}

impl ClientMessage {
    /// Build the handshake frame for `token`.
    pub fn auth(token: &SecretString) -> Self {
        Self::Auth {
            token: token.clone(),
            agent_version: Some(AGENT_VERSION.to_owned()),
        }
    }

    /// Short, secret-free name of the frame type for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Result(_) => "result",
            Self::InventoryFull { .. } => "inventory_full",
            Self::InventoryDiff { .. } => "inventory_diff",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        encode(self)
    }

    pub fn decode(text: &str) -> Result<Self, Error> {
        decode(text)
    }
}

fn expose_token<S: Serializer>(token: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(token.expose_secret())
}

fn secret_token<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// Status of a finished command, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Payload of a `result` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub completed_at: DateTime<Utc>,
}

/// One entity as reported in inventory frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub name: String,
    pub domain: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,
}

// ── Server → client ──────────────────────────────────────────────────

/// Messages the remote service sends to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    AuthReject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Command(CommandFrame),
    /// Delivery acknowledgement for a previously sent frame.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Ping,
    Pong,
    /// Any frame type this agent version does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, Error> {
        encode(self)
    }

    pub fn decode(text: &str) -> Result<Self, Error> {
        decode(text)
    }
}

/// Payload of a `command` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub id: String,
    pub entity: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

// ── Codec helpers ────────────────────────────────────────────────────

fn encode<T: Serialize>(message: &T) -> Result<String, Error> {
    serde_json::to_string(message).map_err(|e| Error::Deserialization {
        message: format!("failed to encode frame: {e}"),
        body: String::new(),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, Error> {
    serde_json::from_str(text).map_err(|e| {
        let preview = text.chars().take(200).collect::<String>();
        Error::Deserialization {
            message: format!("{e} (frame preview: {preview:?})"),
            body: text.to_owned(),
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn auth_frame_carries_plain_token() {
        let token = SecretString::from("agent-secret".to_owned());
        let text = ClientMessage::auth(&token).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["token"], "agent-secret");
        assert_eq!(value["agent_version"], AGENT_VERSION);
    }

    #[test]
    fn auth_frame_debug_is_redacted() {
        let token = SecretString::from("agent-secret".to_owned());
        let debug = format!("{:?}", ClientMessage::auth(&token));
        assert!(!debug.contains("agent-secret"), "leaked: {debug}");
    }

    #[test]
    fn result_frame_uses_kebab_case_status() {
        let frame = ClientMessage::Result(ResultFrame {
            id: "c1".into(),
            status: ResultStatus::TimedOut,
            detail: Some("no answer within 10s".into()),
            data: None,
            completed_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        });
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["id"], "c1");
        assert_eq!(value["status"], "timed-out");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn inventory_diff_shape() {
        let frame = ClientMessage::InventoryDiff {
            added: vec![],
            removed: vec!["light.porch".into()],
            changed: vec![],
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "inventory_diff",
                "added": [],
                "removed": ["light.porch"],
                "changed": []
            })
        );
    }

    #[test]
    fn decode_command_without_params() {
        let msg = ServerMessage::decode(
            r#"{"type":"command","id":"c1","entity":"lock.front_door","action":"lock"}"#,
        )
        .unwrap();
        let ServerMessage::Command(frame) = msg else {
            panic!("expected command, got {msg:?}");
        };
        assert_eq!(frame.id, "c1");
        assert_eq!(frame.entity, "lock.front_door");
        assert_eq!(frame.action, "lock");
        assert!(frame.params.is_empty());
        assert!(frame.issued_at.is_none());
    }

    #[test]
    fn decode_handshake_replies() {
        assert_eq!(
            ServerMessage::decode(r#"{"type":"auth_ok"}"#).unwrap(),
            ServerMessage::AuthOk { session_id: None }
        );
        assert_eq!(
            ServerMessage::decode(r#"{"type":"auth_reject","reason":"revoked"}"#).unwrap(),
            ServerMessage::AuthReject {
                reason: Some("revoked".into())
            }
        );
    }

    #[test]
    fn unknown_frame_type_is_tolerated() {
        assert_eq!(
            ServerMessage::decode(r#"{"type":"welcome","motd":"hi"}"#).unwrap(),
            ServerMessage::Unknown
        );
    }

    #[test]
    fn malformed_frame_is_a_deserialization_error() {
        let err = ServerMessage::decode("not json at all").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }
}
