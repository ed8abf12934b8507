//! The single event loop that owns every connection.
//!
//! Socket callbacks (open, frame, drain, close) and finished commands all
//! arrive as [`HubEvent`]s on one channel and are applied in order, so the
//! registry and each connection are only ever touched from this task.
//! Commands themselves run on spawned tasks and report back with
//! [`HubEvent::Reply`].

use std::sync::Arc;

use tally_core::{Clock, ConnectionId, Message, MessageError, Response};
use tally_engine::{CommandPipeline, ConnectionContext};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionMetadata, DEFAULT_PENDING_LIMIT};
use crate::events::ConnectionEvent;
use crate::registry::ConnectionRegistry;
use crate::transport::Socket;

pub enum HubEvent {
    Open {
        socket: Arc<dyn Socket>,
        metadata: ConnectionMetadata,
    },
    Frame {
        socket: Arc<dyn Socket>,
        frame: Frame,
    },
    Drain {
        socket: Arc<dyn Socket>,
    },
    Close {
        socket: Arc<dyn Socket>,
    },
    Reply {
        id: ConnectionId,
        response: Response,
    },
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary,
}

/// A frame that passed envelope wrapping and should run through the pipeline.
pub struct Dispatch {
    pub context: ConnectionContext,
    pub message: Message,
}

pub struct Hub {
    registry: ConnectionRegistry,
    pipeline: Arc<CommandPipeline>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ConnectionEvent>,
    inbox: mpsc::Sender<HubEvent>,
    pending_limit: usize,
}

impl Hub {
    pub fn new(
        pipeline: Arc<CommandPipeline>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<ConnectionEvent>,
        inbox: mpsc::Sender<HubEvent>,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            pipeline,
            clock,
            events,
            inbox,
            pending_limit: DEFAULT_PENDING_LIMIT,
        }
    }

    /// Per-connection cap on queued responses and running commands.
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register a new connection and greet it.
    pub fn on_open(&mut self, socket: Arc<dyn Socket>, metadata: ConnectionMetadata) -> ConnectionId {
        let mut conn = Connection::new(socket, metadata, Arc::clone(&self.clock)).with_limit(self.pending_limit);
        let id = conn.id().clone();
        conn.reply(
            Response::new()
                .with("event", "connected")
                .with("id", id.as_str()),
        );
        self.registry.add(conn);
        info!(connection_id = %id, total = self.registry.total(), "connection opened");
        let _ = self.events.send(ConnectionEvent::Connected { id: id.clone() });
        id
    }

    /// Wrap an inbound frame. Returns the work to run, if any.
    pub fn on_frame(&mut self, socket: &Arc<dyn Socket>, frame: Frame) -> Option<Dispatch> {
        let Some(conn) = self.registry.get_mut(socket.key()) else {
            debug!(socket = %socket.key(), "frame from unknown socket, closing");
            socket.close();
            return None;
        };
        let id = conn.id().clone();

        match frame {
            Frame::Text(content) => {
                if !conn.begin_command() {
                    warn!(connection_id = %id, in_flight = conn.in_flight(), "too many commands in flight, closing");
                    let _ = self.registry.delete(&id);
                    return None;
                }
                Some(Dispatch {
                    context: conn.context(),
                    message: Message::new(self.clock.now_ms(), content),
                })
            }
            Frame::Binary => {
                self.deliver(&id, MessageError::Binary.to_response());
                None
            }
        }
    }

    /// Flush a connection's queue once its socket has room again. A socket
    /// that refills meanwhile reports `Dropped` and raises a fresh drain.
    pub fn on_drain(&mut self, socket: &Arc<dyn Socket>) {
        match self.registry.get_mut(socket.key()) {
            Some(conn) => conn.send_pending(),
            None => {
                debug!(socket = %socket.key(), "drain for unknown socket, closing");
                socket.close();
            }
        }
    }

    pub fn on_close(&mut self, socket: &Arc<dyn Socket>) {
        let id = self.registry.get(socket.key()).map(|c| c.id().clone());
        if let Some(id) = id {
            let _ = self.registry.delete(&id);
            info!(connection_id = %id, total = self.registry.total(), "connection closed");
        }
    }

    /// Hand a finished command's response to its connection, if still open.
    pub fn deliver(&mut self, id: &ConnectionId, response: Response) {
        if response.is_error() {
            let _ = self.events.send(ConnectionEvent::Error {
                id: id.clone(),
                response: response.clone(),
            });
        }
        match self.registry.get_mut(id) {
            Some(conn) => conn.reply(response),
            None => debug!(connection_id = %id, "response for departed connection"),
        }
    }

    /// A spawned command finished: release its slot and deliver the result.
    pub fn complete(&mut self, id: &ConnectionId, response: Response) {
        if let Some(conn) = self.registry.get_mut(id) {
            conn.finish_command();
        }
        self.deliver(id, response);
    }

    pub fn shutdown(&mut self) {
        info!(connections = self.registry.total(), "hub shutting down");
        self.registry.clear();
    }

    fn spawn_dispatch(&self, dispatch: Dispatch) {
        let pipeline = Arc::clone(&self.pipeline);
        let inbox = self.inbox.clone();
        drop(tokio::spawn(async move {
            let response = pipeline.handle(&dispatch.context, &dispatch.message).await;
            let reply = HubEvent::Reply {
                id: dispatch.context.id,
                response,
            };
            let _ = inbox.send(reply).await;
        }));
    }

    /// Apply events until shutdown.
    pub async fn run(mut self, mut rx: mpsc::Receiver<HubEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                HubEvent::Open { socket, metadata } => {
                    let _ = self.on_open(socket, metadata);
                }
                HubEvent::Frame { socket, frame } => {
                    if let Some(dispatch) = self.on_frame(&socket, frame) {
                        self.spawn_dispatch(dispatch);
                    }
                }
                HubEvent::Drain { socket } => self.on_drain(&socket),
                HubEvent::Close { socket } => self.on_close(&socket),
                HubEvent::Reply { id, response } => self.complete(&id, response),
                HubEvent::Shutdown => {
                    self.shutdown();
                    break;
                }
            }
        }
    }
}
