// homelink-api: wire protocol, WebSocket transport, and Home Assistant REST client

pub mod error;
pub mod local;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use local::{ApiStatus, EntityState, LocalClient};
pub use protocol::{
    ClientMessage, CommandFrame, EntityRecord, ResultFrame, ResultStatus, ServerMessage,
};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{Connector, Link, MemoryPeer, WsConnector, agent_ws_url};
