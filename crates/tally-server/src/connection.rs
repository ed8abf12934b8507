//! Per-socket state: the outbound queue and the flow-control flag.

use std::collections::VecDeque;
use std::sync::Arc;

use tally_core::{Clock, ConnectionId, Response};
use tally_engine::ConnectionContext;
use tracing::{debug, warn};

use crate::transport::{SendStatus, Socket, SocketKey};

/// Default cap on queued responses and on commands in flight per connection.
pub const DEFAULT_PENDING_LIMIT: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Overpressured,
    Closed,
}

/// Values captured at upgrade time and carried for the connection's lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
}

pub struct Connection {
    id: ConnectionId,
    socket: Arc<dyn Socket>,
    pending: VecDeque<Response>,
    limit: usize,
    in_flight: usize,
    overpressured: bool,
    closed: bool,
    metadata: ConnectionMetadata,
    clock: Arc<dyn Clock>,
}

impl Connection {
    pub fn new(socket: Arc<dyn Socket>, metadata: ConnectionMetadata, clock: Arc<dyn Clock>) -> Self {
        Self::with_id(ConnectionId::new(), socket, metadata, clock)
    }

    pub fn with_id(
        id: ConnectionId,
        socket: Arc<dyn Socket>,
        metadata: ConnectionMetadata,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            socket,
            pending: VecDeque::new(),
            limit: DEFAULT_PENDING_LIMIT,
            in_flight: 0,
            overpressured: false,
            closed: false,
            metadata,
            clock,
        }
    }

    /// Close the connection once more than `limit` responses are queued or
    /// commands are running.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    pub fn socket_key(&self) -> SocketKey {
        self.socket.key()
    }

    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.overpressured {
            ConnectionState::Overpressured
        } else {
            ConnectionState::Open
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Count a command about to run. False when the connection is already
    /// at its limit.
    pub fn begin_command(&mut self) -> bool {
        if self.in_flight >= self.limit {
            return false;
        }
        self.in_flight += 1;
        true
    }

    pub fn finish_command(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Snapshot handed to the command pipeline.
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext::new(self.id.clone(), self.metadata.authorization.clone())
    }

    /// Send now, or queue behind earlier responses while overpressured.
    pub fn reply(&mut self, mut response: Response) {
        if self.closed {
            return;
        }
        if self.overpressured {
            if self.pending.len() >= self.limit {
                warn!(connection_id = %self.id, queued = self.pending.len(), "outbound queue full, closing");
                self.close();
                return;
            }
            self.pending.push_back(response);
            return;
        }

        response.stamp(self.clock.now_ms());
        let text = match serde_json::to_string(&response) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "response not serializable");
                return;
            }
        };

        match self.socket.send(text) {
            SendStatus::Success => {}
            SendStatus::Backpressure => {
                debug!(connection_id = %self.id, "overpressured");
                self.overpressured = true;
            }
            SendStatus::Dropped => {
                // Not written: keep it at the head so the next drain resends it first.
                debug!(connection_id = %self.id, "send dropped, requeued");
                self.overpressured = true;
                self.pending.push_front(response);
            }
        }
    }

    /// Flush queued responses in order until empty or saturated again.
    pub fn send_pending(&mut self) {
        if self.closed {
            return;
        }
        self.overpressured = false;
        let queued = self.pending.len();
        while !self.overpressured {
            let Some(response) = self.pending.pop_front() else {
                break;
            };
            self.reply(response);
        }
        debug!(
            connection_id = %self.id,
            flushed = queued.saturating_sub(self.pending.len()),
            remaining = self.pending.len(),
            "drain"
        );
    }

    /// Idempotent. Queued responses are discarded.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.socket.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeSocket;
    use tally_core::ManualClock;

    fn connection() -> (Connection, Arc<FakeSocket>, Arc<ManualClock>) {
        let socket = FakeSocket::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let conn = Connection::new(socket.clone(), ConnectionMetadata::default(), clock.clone());
        (conn, socket, clock)
    }

    #[test]
    fn reply_stamps_at_send_time() {
        let (mut conn, socket, clock) = connection();
        let resp = Response::message("one");
        clock.set(5_000);
        conn.reply(resp);
        assert_eq!(socket.frames()[0]["timestamp"], 5_000);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn backpressure_queues_following_replies() {
        let (mut conn, socket, _) = connection();
        socket.script([SendStatus::Backpressure]);
        conn.reply(Response::message("a"));
        assert_eq!(conn.state(), ConnectionState::Overpressured);

        conn.reply(Response::message("b"));
        conn.reply(Response::message("c"));
        assert_eq!(socket.messages(), vec!["a"]);
        assert_eq!(conn.pending_len(), 2);

        conn.send_pending();
        assert_eq!(socket.messages(), vec!["a", "b", "c"]);
        assert_eq!(conn.pending_len(), 0);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn drain_stops_when_saturated_again() {
        let (mut conn, socket, _) = connection();
        socket.script([SendStatus::Backpressure]);
        conn.reply(Response::message("a"));
        for m in ["b", "c", "d"] {
            conn.reply(Response::message(m));
        }

        socket.script([SendStatus::Backpressure]);
        conn.send_pending();
        assert_eq!(socket.messages(), vec!["a", "b"]);
        assert_eq!(conn.pending_len(), 2);
        assert_eq!(conn.state(), ConnectionState::Overpressured);

        conn.send_pending();
        assert_eq!(socket.messages(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn dropped_frame_is_resent_first() {
        let (mut conn, socket, _) = connection();
        socket.script([SendStatus::Dropped]);
        conn.reply(Response::message("a"));
        conn.reply(Response::message("b"));
        assert!(socket.messages().is_empty());
        assert_eq!(conn.state(), ConnectionState::Overpressured);

        conn.send_pending();
        assert_eq!(socket.messages(), vec!["a", "b"]);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let (mut conn, socket, _) = connection();
        socket.script([SendStatus::Backpressure]);
        conn.reply(Response::message("a"));
        conn.reply(Response::message("queued"));

        conn.close();
        conn.close();
        assert!(socket.is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.pending_len(), 0);

        conn.reply(Response::message("late"));
        conn.send_pending();
        assert_eq!(socket.messages(), vec!["a"]);
    }

    #[test]
    fn full_queue_closes_connection() {
        let (conn, socket, _) = connection();
        let mut conn = conn.with_limit(2);
        socket.script([SendStatus::Backpressure]);
        conn.reply(Response::message("a"));
        conn.reply(Response::message("b"));
        conn.reply(Response::message("c"));
        assert_eq!(conn.pending_len(), 2);
        assert!(!socket.is_closed());

        conn.reply(Response::message("d"));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(socket.is_closed());
        assert_eq!(conn.pending_len(), 0);
    }

    #[test]
    fn in_flight_commands_are_capped() {
        let (conn, _, _) = connection();
        let mut conn = conn.with_limit(2);
        assert!(conn.begin_command());
        assert!(conn.begin_command());
        assert!(!conn.begin_command());
        assert_eq!(conn.in_flight(), 2);

        conn.finish_command();
        assert!(conn.begin_command());
        conn.finish_command();
        conn.finish_command();
        conn.finish_command();
        assert_eq!(conn.in_flight(), 0);
    }

    #[test]
    fn context_carries_authorization() {
        let socket = FakeSocket::new();
        let conn = Connection::with_id(
            ConnectionId::from_raw("conn_x"),
            socket,
            ConnectionMetadata {
                authorization: Some("Bearer abc".into()),
            },
            Arc::new(ManualClock::new(1)),
        );
        let ctx = conn.context();
        assert_eq!(ctx.id.as_str(), "conn_x");
        assert_eq!(ctx.authorization.as_deref(), Some("Bearer abc"));
    }
}
