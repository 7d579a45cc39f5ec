// Local control surface (Home Assistant REST API)
//
// `client` holds transport mechanics and status mapping; `models` holds
// the response shapes.

pub mod client;
pub mod models;

pub use client::LocalClient;
pub use models::{ApiStatus, EntityState};
