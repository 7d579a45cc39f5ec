// ── Commands and their results ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Remote-assigned command identifier. The dedup key for retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A request from the remote side to act on one entity.
///
/// `entity` is kept exactly as received; the dispatcher parses and checks it
/// against the registry before anything reaches the local surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub entity: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CommandStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Terminal outcome of a command. Exactly one exists per [`CommandId`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub id: CommandId,
    pub status: CommandStatus,
    pub detail: Option<String>,
    pub data: Option<Value>,
    pub completed_at: DateTime<Utc>,
}

impl CommandResult {
    pub fn succeeded(id: CommandId, data: Option<Value>) -> Self {
        Self {
            id,
            status: CommandStatus::Succeeded,
            detail: None,
            data,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(id: CommandId, detail: impl Into<String>) -> Self {
        Self::finished(id, CommandStatus::Failed, detail.into())
    }

    pub fn timed_out(id: CommandId, detail: impl Into<String>) -> Self {
        Self::finished(id, CommandStatus::TimedOut, detail.into())
    }

    fn finished(id: CommandId, status: CommandStatus, detail: String) -> Self {
        Self {
            id,
            status,
            detail: Some(detail),
            data: None,
            completed_at: Utc::now(),
        }
    }
}
