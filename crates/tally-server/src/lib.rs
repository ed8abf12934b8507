//! WebSocket command server: transport, connections, and the hub loop.

pub mod config;
pub mod connection;
pub mod events;
pub mod hub;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::{ConfigError, ServerConfig};
pub use connection::{Connection, ConnectionMetadata, ConnectionState};
pub use events::ConnectionEvent;
pub use hub::{Frame, Hub, HubEvent};
pub use registry::{ConnectionRegistry, Lookup};
pub use server::{build_pipeline, ServerError, ServerHandle, TallyServer};
pub use transport::{SendStatus, Socket, SocketKey, WsSocket};
