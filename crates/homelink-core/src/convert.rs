// ── Wire ↔ domain conversions ──
//
// Bridges `homelink_api` frame and REST types to the core model.

use chrono::Utc;
use homelink_api::{ClientMessage, CommandFrame, EntityRecord, EntityState, ResultFrame, ResultStatus};

use crate::model::{Command, CommandId, CommandResult, CommandStatus, EntityId, EntitySnapshot, InvalidEntityId};

impl From<CommandFrame> for Command {
    fn from(frame: CommandFrame) -> Self {
        Self {
            id: CommandId::new(frame.id),
            entity: frame.entity,
            action: frame.action,
            params: frame.params,
            issued_at: frame.issued_at.unwrap_or_else(Utc::now),
        }
    }
}

impl From<CommandStatus> for ResultStatus {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Succeeded => Self::Succeeded,
            CommandStatus::Failed => Self::Failed,
            CommandStatus::TimedOut => Self::TimedOut,
        }
    }
}

impl From<&CommandResult> for ResultFrame {
    fn from(result: &CommandResult) -> Self {
        Self {
            id: result.id.as_str().to_owned(),
            status: result.status.into(),
            detail: result.detail.clone(),
            data: result.data.clone(),
            completed_at: result.completed_at,
        }
    }
}

impl CommandResult {
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::Result(self.into())
    }
}

impl From<&EntitySnapshot> for EntityRecord {
    fn from(entity: &EntitySnapshot) -> Self {
        Self {
            entity_id: entity.id.to_string(),
            name: entity.name.clone(),
            domain: entity.domain().to_owned(),
            state: entity.state.clone(),
            last_changed: entity.last_changed,
        }
    }
}

impl TryFrom<EntityState> for EntitySnapshot {
    type Error = InvalidEntityId;

    fn try_from(state: EntityState) -> Result<Self, Self::Error> {
        let id = EntityId::parse(&state.entity_id)?;
        let name = state
            .friendly_name()
            .map_or_else(|| id.object_id().replace('_', " "), str::to_owned);
        Ok(Self {
            id,
            name,
            state: state.state,
            last_changed: state.last_changed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn state_without_friendly_name_falls_back_to_object_id() {
        let state: EntityState = serde_json::from_value(json!({
            "entity_id": "switch.garden_pump",
            "state": "off",
            "attributes": {},
        }))
        .unwrap();
        let snapshot = EntitySnapshot::try_from(state).unwrap();
        assert_eq!(snapshot.name, "garden pump");
        assert_eq!(snapshot.domain(), "switch");
    }

    #[test]
    fn record_carries_domain() {
        let snapshot = EntitySnapshot {
            id: EntityId::parse("lock.front_door").unwrap(),
            name: "Front Door".into(),
            state: "locked".into(),
            last_changed: None,
        };
        let record = EntityRecord::from(&snapshot);
        assert_eq!(record.entity_id, "lock.front_door");
        assert_eq!(record.domain, "lock");
    }

    #[test]
    fn result_maps_to_wire_frame() {
        let result = CommandResult::failed(CommandId::from("c9"), "unknown entity 'lock.back'");
        let ClientMessage::Result(frame) = result.to_message() else {
            panic!("expected result frame");
        };
        assert_eq!(frame.id, "c9");
        assert_eq!(frame.status, ResultStatus::Failed);
        assert_eq!(frame.detail.as_deref(), Some("unknown entity 'lock.back'"));
    }
}
