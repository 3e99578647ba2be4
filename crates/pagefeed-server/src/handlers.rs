//! Connection handlers for the pagefeed server.
//!
//! This module handles the connection lifecycle, message processing and the
//! producer HTTP API.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::telemetry::MetricsTelemetry;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use pagefeed_core::{
    outbound_queue, BuildState, ChannelError, ChannelManager, ComponentRegistry, ConnectionId,
    ConnectionState, FsPageDataReader, StaticQueryComponent,
};
use pagefeed_protocol::{codec, ClientEvent, Encoded, Encoding, OverlayError, QueryResult};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The channel manager.
    pub manager: Arc<ChannelManager>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state. The channel is not initialized yet.
    ///
    /// # Errors
    ///
    /// Returns an error if static query discovery fails.
    pub fn new(config: Config) -> Result<Self> {
        let build_state = build_state(&config)?;
        let manager = ChannelManager::new(
            Arc::new(FsPageDataReader),
            build_state,
            Arc::new(MetricsTelemetry::new(&config.telemetry)),
        )
        .with_max_clients(config.limits.max_connections);

        Ok(Self {
            manager: Arc::new(manager),
            config,
        })
    }

    /// Initialize the channel against the configured root directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel was already initialized.
    pub fn initialize(&self) -> Result<()> {
        self.manager
            .init(self.config.root_dir.clone())
            .context("Failed to initialize channel")?;
        Ok(())
    }
}

fn build_state(config: &Config) -> Result<Arc<dyn BuildState>> {
    let registry = if config.static_queries.is_empty() {
        ComponentRegistry::discover(config.root_dir.clone()).with_context(|| {
            format!(
                "Failed to discover static queries under {}",
                config.root_dir.display()
            )
        })?
    } else {
        let components = config
            .static_queries
            .iter()
            .map(|q| StaticQueryComponent::new(q.hash.clone(), q.component_path.clone()))
            .collect();
        ComponentRegistry::new(config.root_dir.clone(), components)
    };

    debug!(static_queries = registry.len(), "Static query components");
    Ok(Arc::new(registry))
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler));

    if state.config.transport.producer_api {
        app = app
            .route("/__pagefeed/page-data", post(page_data_handler))
            .route("/__pagefeed/static-query", post(static_query_handler))
            .route("/__pagefeed/error", post(error_handler));
    }

    app.with_state(state)
}

/// Serve the app on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops unexpectedly.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, build_app(state)).await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);
    state.initialize()?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Pagefeed server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.manager.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "initialized": stats.initialized,
        "clients": stats.connected_clients,
        "activePaths": stats.active_paths,
    }))
}

/// Producer: a page query result was recomputed.
async fn page_data_handler(
    State(state): State<Arc<AppState>>,
    Json(result): Json<QueryResult>,
) -> StatusCode {
    debug!(path = %result.id, "Page data update");
    state.manager.emit_page_data(result);
    metrics::record_emit("page");
    StatusCode::NO_CONTENT
}

/// Producer: a static query result was recomputed.
async fn static_query_handler(
    State(state): State<Arc<AppState>>,
    Json(result): Json<QueryResult>,
) -> StatusCode {
    debug!(hash = %result.id, "Static query update");
    state.manager.emit_static_query_data(result);
    metrics::record_emit("static");
    StatusCode::NO_CONTENT
}

/// Producer: a build error was raised or cleared.
async fn error_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<OverlayError>,
) -> StatusCode {
    debug!(id = %report.id, cleared = report.message.is_none(), "Overlay error update");
    state.manager.emit_error(report.id, report.message);
    metrics::record_emit("error");
    StatusCode::NO_CONTENT
}

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    encoding: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.manager.is_initialized() {
        return (StatusCode::SERVICE_UNAVAILABLE, "channel not ready").into_response();
    }
    // Early rejection only; `ChannelManager::connect` enforces the limit.
    if state.manager.connected_clients() >= state.config.limits.max_connections {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let referer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let encoding = params
        .encoding
        .as_deref()
        .map(Encoding::from_name)
        .unwrap_or_default();

    ws.on_upgrade(move |socket| handle_websocket(socket, state, referer, encoding))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    referer: Option<String>,
    encoding: Encoding,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let (outbound, mut inbox) = outbound_queue();

    let mut conn = match state
        .manager
        .connect(connection_id.clone(), referer.as_deref(), outbound)
    {
        Ok(conn) => conn,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Connection rejected");
            metrics::record_error("connect");
            let code = match e {
                ChannelError::AtCapacity { .. } => close_code::AGAIN,
                ChannelError::NotReady | ChannelError::AlreadyInitialized => close_code::ERROR,
            };
            let frame = CloseFrame {
                code,
                reason: e.to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    debug!(connection = %connection_id, encoding = ?encoding, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Messages queued for this client by the channel
            Some(message) = inbox.recv() => {
                let encoded = match codec::encode(&message, encoding) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Encode error");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                metrics::record_message(encoded.len(), "outbound");
                let frame = match encoded {
                    Encoded::Text(text) => Message::Text(text),
                    Encoded::Binary(data) => Message::Binary(data.to_vec()),
                };
                if sender.send(frame).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                let keep_open = match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(text.as_bytes(), Encoding::Json, &mut conn, &state).await
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_inbound(&data, Encoding::MessagePack, &mut conn, &state).await
                    }
                    Some(Ok(Message::Ping(data))) => sender.send(Message::Pong(data)).await.is_ok(),
                    Some(Ok(Message::Pong(_))) => true,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        false
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        false
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        false
                    }
                };
                if !keep_open {
                    break;
                }
            }
        }
    }

    state.manager.disconnect(&mut conn);
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and apply one inbound frame. Returns false once the client has
/// announced it is leaving.
async fn handle_inbound(
    data: &[u8],
    encoding: Encoding,
    conn: &mut ConnectionState,
    state: &AppState,
) -> bool {
    let limit = state.config.limits.max_message_size;
    if data.len() > limit {
        warn!(connection = %conn.id(), size = data.len(), limit, "Dropping oversized frame");
        metrics::record_error("message_too_large");
        return true;
    }

    let start = Instant::now();
    metrics::record_message(data.len(), "inbound");

    let event = match codec::decode_event(data, encoding) {
        Ok(event) => event,
        Err(e) => {
            warn!(connection = %conn.id(), error = %e, "Dropping undecodable frame");
            metrics::record_error("decode");
            return true;
        }
    };

    let keep_open = event != ClientEvent::Disconnect;
    if let Some(outcome) = state.manager.handle_event(conn, event).await {
        metrics::record_page_data_request(outcome.as_str());
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
    keep_open
}
