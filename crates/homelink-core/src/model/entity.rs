// ── Entity identity and snapshots ──

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A `<domain>.<object_id>` entity identifier, e.g. `lock.front_door`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    raw: String,
    dot: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entity id '{0}': expected '<domain>.<object_id>'")]
pub struct InvalidEntityId(pub String);

impl EntityId {
    pub fn parse(raw: &str) -> Result<Self, InvalidEntityId> {
        let invalid = || InvalidEntityId(raw.to_owned());
        let (domain, object_id) = raw.split_once('.').ok_or_else(invalid)?;
        if !is_slug(domain) || !is_slug(object_id) {
            return Err(invalid());
        }
        Ok(Self {
            raw: raw.to_owned(),
            dot: domain.len(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.raw[..self.dot]
    }

    pub fn object_id(&self) -> &str {
        &self.raw[self.dot + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn is_slug(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for EntityId {
    type Err = InvalidEntityId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = InvalidEntityId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.raw
    }
}

/// Point-in-time description of one controllable entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    pub state: String,
    pub last_changed: Option<DateTime<Utc>>,
}

impl EntitySnapshot {
    pub fn domain(&self) -> &str {
        self.id.domain()
    }
}
