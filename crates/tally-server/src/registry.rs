//! Table of live connections, addressable by id or by socket.

use std::collections::HashMap;

use tally_core::ConnectionId;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::transport::SocketKey;

/// Either handle a connection can be looked up by.
#[derive(Clone, Copy, Debug)]
pub enum Lookup<'a> {
    Id(&'a ConnectionId),
    Socket(SocketKey),
}

impl<'a> From<&'a ConnectionId> for Lookup<'a> {
    fn from(id: &'a ConnectionId) -> Self {
        Self::Id(id)
    }
}

impl From<SocketKey> for Lookup<'_> {
    fn from(key: SocketKey) -> Self {
        Self::Socket(key)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    by_id: HashMap<ConnectionId, Connection>,
    by_socket: HashMap<SocketKey, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve<'a>(&'a self, lookup: Lookup<'a>) -> Option<&'a ConnectionId> {
        match lookup {
            Lookup::Id(id) => Some(id),
            Lookup::Socket(key) => self.by_socket.get(&key),
        }
    }

    /// Track a connection. A live entry with the same id is closed and evicted first.
    pub fn add(&mut self, conn: Connection) {
        if let Some(mut prior) = self.by_id.remove(conn.id()) {
            warn!(connection_id = %prior.id(), "duplicate connection id, evicting prior");
            let _ = self.by_socket.remove(&prior.socket_key());
            prior.close();
        }
        let _ = self.by_socket.insert(conn.socket_key(), conn.id().clone());
        let _ = self.by_id.insert(conn.id().clone(), conn);
    }

    pub fn get<'a>(&self, lookup: impl Into<Lookup<'a>>) -> Option<&Connection> {
        let lookup = lookup.into();
        let id = match lookup {
            Lookup::Id(id) => id,
            Lookup::Socket(key) => self.by_socket.get(&key)?,
        };
        self.by_id.get(id)
    }

    pub fn get_mut<'a>(&mut self, lookup: impl Into<Lookup<'a>>) -> Option<&mut Connection> {
        let id = match lookup.into() {
            Lookup::Id(id) => id.clone(),
            Lookup::Socket(key) => self.by_socket.get(&key)?.clone(),
        };
        self.by_id.get_mut(&id)
    }

    pub fn exists<'a>(&self, lookup: impl Into<Lookup<'a>>) -> bool {
        self.get(lookup).is_some()
    }

    /// Close and forget a connection. Returns whether anything was removed.
    pub fn delete<'a>(&mut self, lookup: impl Into<Lookup<'a>>) -> bool {
        let Some(id) = self.resolve(lookup.into()).cloned() else {
            return false;
        };
        let Some(mut conn) = self.by_id.remove(&id) else {
            return false;
        };
        let _ = self.by_socket.remove(&conn.socket_key());
        conn.close();
        debug!(connection_id = %id, "connection removed");
        true
    }

    /// Close and forget every connection.
    pub fn clear(&mut self) {
        let count = self.by_id.len();
        for (_, mut conn) in self.by_id.drain() {
            conn.close();
        }
        self.by_socket.clear();
        if count > 0 {
            debug!(count, "registry cleared");
        }
    }

    pub fn total(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tally_core::ManualClock;

    use crate::connection::{ConnectionMetadata, ConnectionState};
    use crate::transport::testing::FakeSocket;
    use crate::transport::Socket;

    fn conn(id: &str) -> (Connection, Arc<FakeSocket>) {
        let socket = FakeSocket::new();
        let conn = Connection::with_id(
            ConnectionId::from_raw(id),
            socket.clone(),
            ConnectionMetadata::default(),
            Arc::new(ManualClock::new(1)),
        );
        (conn, socket)
    }

    #[test]
    fn lookup_by_id_and_socket() {
        let mut registry = ConnectionRegistry::new();
        let (c, socket) = conn("conn_1");
        let id = c.id().clone();
        registry.add(c);

        assert_eq!(registry.total(), 1);
        assert!(registry.exists(&id));
        assert!(registry.exists(socket.key()));
        assert_eq!(registry.get(socket.key()).map(|c| c.id().clone()), Some(id));
        assert!(!registry.exists(SocketKey::from_raw(u64::MAX)));
    }

    #[test]
    fn duplicate_id_evicts_prior() {
        let mut registry = ConnectionRegistry::new();
        let (first, first_socket) = conn("conn_dup");
        let (second, second_socket) = conn("conn_dup");
        registry.add(first);
        registry.add(second);

        assert_eq!(registry.total(), 1);
        assert!(first_socket.is_closed());
        assert!(!second_socket.is_closed());
        assert!(!registry.exists(first_socket.key()));
        assert!(registry.exists(second_socket.key()));
    }

    #[test]
    fn delete_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (c, socket) = conn("conn_1");
        registry.add(c);

        assert!(registry.delete(socket.key()));
        assert!(socket.is_closed());
        assert!(!registry.delete(socket.key()));
        assert!(!registry.delete(&ConnectionId::from_raw("conn_1")));
        assert_eq!(registry.total(), 0);
    }

    #[test]
    fn clear_closes_everything() {
        let mut registry = ConnectionRegistry::new();
        let sockets: Vec<_> = (0..3)
            .map(|i| {
                let (c, s) = conn(&format!("conn_{i}"));
                registry.add(c);
                s
            })
            .collect();

        registry.clear();
        assert_eq!(registry.total(), 0);
        assert!(sockets.iter().all(|s| s.is_closed()));
        assert!(sockets.iter().all(|s| !registry.exists(s.key())));
    }

    #[test]
    fn get_mut_reaches_the_connection() {
        let mut registry = ConnectionRegistry::new();
        let (c, socket) = conn("conn_1");
        registry.add(c);
        registry.get_mut(socket.key()).unwrap().close();
        assert_eq!(registry.get(socket.key()).unwrap().state(), ConnectionState::Closed);
    }
}
