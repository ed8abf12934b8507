//! axum HTTP server with the deferred WebSocket upgrade.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use secrecy::SecretString;
use tally_core::{Clock, SystemClock};
use tally_engine::{CommandPipeline, CommandRegistry, HandlerDeps, JwtTokenService, Pbkdf2PasswordHasher};
use tally_store::InMemoryAccountRepo;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::connection::ConnectionMetadata;
use crate::events::ConnectionEvent;
use crate::hub::{Frame, Hub, HubEvent};
use crate::transport::{Socket, WsSocket};

const HUB_CAPACITY: usize = 1024;
const EVENT_CAPACITY: usize = 256;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pipeline over an in-memory account store, with the collaborators
/// configured from `config`.
pub fn build_pipeline(config: &ServerConfig, clock: Arc<dyn Clock>) -> Result<CommandPipeline, ConfigError> {
    config.validate()?;
    let secret: &SecretString = config.jwt_secret.as_ref().ok_or(ConfigError::MissingSecret)?;
    let tokens = JwtTokenService::new(secret, config.token_ttl_secs, Arc::clone(&clock));
    let deps = HandlerDeps::new(
        Arc::new(InMemoryAccountRepo::new()),
        Arc::new(Pbkdf2PasswordHasher::new(config.hash_iterations)),
        Arc::new(tokens),
        clock,
    )
    .with_initial_balance(config.initial_balance);
    Ok(CommandPipeline::new(CommandRegistry::with_defaults(), deps).with_freshness_window(config.freshness_window_ms))
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    hub: mpsc::Sender<HubEvent>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    config: Arc<ServerConfig>,
}

pub struct TallyServer {
    config: Arc<ServerConfig>,
    pipeline: Arc<CommandPipeline>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl TallyServer {
    pub fn new(config: ServerConfig, pipeline: CommandPipeline, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            clock,
            events,
        }
    }

    /// Server with the default collaborators and the system clock.
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pipeline = build_pipeline(&config, Arc::clone(&clock))?;
        Ok(Self::new(config, pipeline, clock))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Bind, spawn the hub and the HTTP server, and return a handle.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let (hub_tx, hub_rx) = mpsc::channel(HUB_CAPACITY);
        let hub = Hub::new(
            self.pipeline,
            self.clock,
            self.events.clone(),
            hub_tx.clone(),
        )
        .with_pending_limit(self.config.max_pending);
        let hub_task = tokio::spawn(hub.run(hub_rx));

        let state = AppState {
            hub: hub_tx.clone(),
            events: self.events.clone(),
            shutdown: shutdown.clone(),
            config: Arc::clone(&self.config),
        };
        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
        let stop = shutdown.clone();
        let http_task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "http server stopped with error");
            }
        });

        info!(addr = %local_addr, path = %self.config.path, "tally server started");

        Ok(ServerHandle {
            local_addr,
            hub: hub_tx,
            events: self.events,
            shutdown,
            tasks: vec![hub_task, http_task],
        })
    }
}

/// Build the router. The WebSocket route is `config.path`.
fn router(state: AppState) -> Router {
    let path = state.config.path.clone();
    Router::new()
        .route(&path, get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Handle returned by [`TallyServer::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    hub: mpsc::Sender<HubEvent>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting upgrades, close every connection, and wait for the
    /// background tasks.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.hub.send(HubEvent::Shutdown).await;

        let drain = futures::future::join_all(self.tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
        }
        info!("tally server stopped");
    }
}

/// GET `config.path`: wait out the upgrade delay, then upgrade.
///
/// Dropping this future (client gave up) abandons the upgrade before any
/// connection exists.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    debug!(%remote, "upgrade requested");
    let _ = state.events.send(ConnectionEvent::Connecting { remote });

    tokio::select! {
        () = tokio::time::sleep(state.config.upgrade_delay()) => {}
        () = state.shutdown.cancelled() => {
            debug!(%remote, "upgrade refused during shutdown");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    let limit = state.config.max_payload_length;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| serve_socket(socket, state, ConnectionMetadata { authorization }))
}

/// Pump one upgraded socket: spawn its writer and forward inbound frames to the hub.
async fn serve_socket(ws: WebSocket, state: AppState, metadata: ConnectionMetadata) {
    let (sink, mut stream) = ws.split();
    let socket: Arc<dyn Socket> = WsSocket::spawn(sink, state.config.max_backpressure, state.hub.clone());

    let open = HubEvent::Open {
        socket: Arc::clone(&socket),
        metadata,
    };
    if state.hub.send(open).await.is_err() {
        socket.close();
        return;
    }

    let idle = state.config.idle_timeout();
    loop {
        let next = tokio::select! {
            next = next_frame(&mut stream, idle) => next,
            () = state.shutdown.cancelled() => break,
        };
        let frame = match next {
            Some(Ok(WsMessage::Text(text))) => Frame::Text(text.as_str().to_owned()),
            Some(Ok(WsMessage::Binary(_))) => Frame::Binary,
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(socket = %socket.key(), error = %e, "read failed");
                break;
            }
        };
        let event = HubEvent::Frame {
            socket: Arc::clone(&socket),
            frame,
        };
        if state.hub.send(event).await.is_err() {
            break;
        }
    }

    let _ = state.hub.send(HubEvent::Close {
        socket: Arc::clone(&socket),
    })
    .await;
    socket.close();
}

/// Next inbound message, or `None` once the idle timeout elapses.
async fn next_frame(
    stream: &mut futures::stream::SplitStream<WebSocket>,
    idle: Option<Duration>,
) -> Option<Result<WsMessage, axum::Error>> {
    match idle {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!(idle_secs = limit.as_secs(), "idle timeout");
                None
            }
        },
        None => stream.next().await,
    }
}
