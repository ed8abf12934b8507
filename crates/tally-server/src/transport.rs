//! Outbound socket contract and its axum WebSocket implementation.
//!
//! A [`Socket`] never blocks: `send` hands the frame to a writer task and
//! reports how full the outbound buffer is. The writer signals the hub
//! with a drain event once a saturated buffer has flushed back under the
//! high-water mark.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::hub::HubEvent;

/// Result of a non-blocking send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued, buffer within bounds.
    Success,
    /// Buffer was already saturated. The frame was not written.
    Dropped,
    /// Queued, but the buffer is now over the high-water mark.
    Backpressure,
}

/// Process-unique handle for one accepted socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketKey(u64);

static NEXT_SOCKET_KEY: AtomicU64 = AtomicU64::new(1);

impl SocketKey {
    pub fn next() -> Self {
        Self(NEXT_SOCKET_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

pub trait Socket: Send + Sync {
    fn key(&self) -> SocketKey;

    /// Queue a text frame.
    fn send(&self, text: String) -> SendStatus;

    /// Bytes queued but not yet written to the peer.
    fn buffered_amount(&self) -> usize;

    /// Close the socket. Idempotent.
    fn close(&self);
}

enum Outbound {
    Text(String),
    Close,
}

/// Buffered-byte accounting shared by [`WsSocket::send`] and the writer.
///
/// `wants_drain` is always raised before the occupancy it reacts to is
/// (re)read, so any release that could bring the buffer under the mark is
/// ordered after the flag and will see it.
struct Occupancy {
    buffered: AtomicUsize,
    wants_drain: AtomicBool,
    max: usize,
}

impl Occupancy {
    fn new(max: usize) -> Self {
        Self {
            buffered: AtomicUsize::new(0),
            wants_drain: AtomicBool::new(false),
            max,
        }
    }

    fn buffered(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    /// Account for `len` bytes about to be queued.
    fn reserve(&self, len: usize) -> SendStatus {
        if self.buffered() >= self.max {
            self.wants_drain.store(true, Ordering::SeqCst);
            // The writer may have flushed between the first read and the flag.
            if self.buffered() >= self.max {
                return SendStatus::Dropped;
            }
        }
        let after = self.buffered.fetch_add(len, Ordering::SeqCst) + len;
        if after > self.max {
            self.wants_drain.store(true, Ordering::SeqCst);
            SendStatus::Backpressure
        } else {
            SendStatus::Success
        }
    }

    /// Undo a reservation whose frame never reached the writer.
    fn cancel(&self, len: usize) {
        let _ = self.buffered.fetch_sub(len, Ordering::SeqCst);
    }

    /// Account for `len` bytes written. Returns true when a drain is due.
    fn release(&self, len: usize) -> bool {
        let remaining = self.buffered.fetch_sub(len, Ordering::SeqCst) - len;
        remaining < self.max && self.wants_drain.swap(false, Ordering::SeqCst)
    }
}

/// [`Socket`] over an axum WebSocket, backed by a writer task.
pub struct WsSocket {
    key: SocketKey,
    tx: mpsc::UnboundedSender<Outbound>,
    occupancy: Occupancy,
    closed: AtomicBool,
}

impl WsSocket {
    /// Spawn the writer for `sink` and return the socket that feeds it.
    pub fn spawn(
        sink: SplitSink<WebSocket, WsMessage>,
        max_backpressure: usize,
        hub: mpsc::Sender<HubEvent>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Arc::new(Self {
            key: SocketKey::next(),
            tx,
            occupancy: Occupancy::new(max_backpressure),
            closed: AtomicBool::new(false),
        });
        drop(tokio::spawn(write_loop(sink, rx, Arc::clone(&socket), hub)));
        socket
    }
}

impl Socket for WsSocket {
    fn key(&self) -> SocketKey {
        self.key
    }

    fn send(&self, text: String) -> SendStatus {
        if self.closed.load(Ordering::Acquire) {
            return SendStatus::Dropped;
        }
        let len = text.len();
        let status = self.occupancy.reserve(len);
        if status == SendStatus::Dropped {
            return status;
        }
        if self.tx.send(Outbound::Text(text)).is_err() {
            self.occupancy.cancel(len);
            return SendStatus::Dropped;
        }
        status
    }

    fn buffered_amount(&self) -> usize {
        self.occupancy.buffered()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    socket: Arc<WsSocket>,
    hub: mpsc::Sender<HubEvent>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                let len = text.len();
                let written = sink.send(WsMessage::Text(text.into())).await;
                let drained = socket.occupancy.release(len);
                if written.is_err() {
                    debug!(socket = %socket.key, "write failed");
                    break;
                }
                if drained {
                    trace!(socket = %socket.key, buffered = socket.occupancy.buffered(), "drained");
                    let drain = HubEvent::Drain {
                        socket: Arc::clone(&socket) as Arc<dyn Socket>,
                    };
                    if hub.send(drain).await.is_err() {
                        break;
                    }
                }
            }
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    socket.closed.store(true, Ordering::Release);
    let _ = sink.close().await;
}
