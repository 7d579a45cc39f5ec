pub mod capability;
pub mod command;
pub mod entity;

pub use command::{Command, CommandId, CommandResult, CommandStatus};
pub use entity::{EntityId, EntitySnapshot, InvalidEntityId};
