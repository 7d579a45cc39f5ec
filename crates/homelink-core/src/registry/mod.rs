pub mod diff;
pub mod store;
pub mod sync;

pub use diff::InventoryDiff;
pub use store::EntityStore;
pub use sync::RegistrySync;
