use std::net::SocketAddr;

use tally_core::{ConnectionId, Response};

/// Lifecycle notifications published by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// An upgrade request was accepted and is waiting out the upgrade delay.
    Connecting { remote: SocketAddr },
    /// A connection opened and was registered.
    Connected { id: ConnectionId },
    /// A command on `id` failed; `response` is what the client was sent.
    Error { id: ConnectionId, response: Response },
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Error { .. } => "error",
        }
    }
}
