//! HTTP and WebSocket boundary around the room table.
//!
//! - `GET /ws` upgrades to the signaling WebSocket.
//! - `GET /status` returns the dashboard report.
//! - `POST /{room}/{client}` relays the request body as a message from `client`.
//! - `DELETE /{room}/{client}` forcibly removes `client`; `ALL` removes the room.
//! - `/deregister/{room}` removes the room.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use serde_json::json;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig, dashboard::Dashboard, error::ServerError, socket::handle_socket,
    table::RoomTable,
};

/// Client id that addresses every member of a room in `DELETE /{room}/{client}`.
pub const ALL_CLIENTS: &str = "ALL";

/// Error sent to a client that an operator removes.
pub const OFFLINE_NOTICE: &str = "YOU_ARE_OFFLINE";

/// Shared state handed to every handler and connection task.
#[derive(Clone)]
pub struct AppState {
    pub table: RoomTable,
    pub dashboard: Arc<Dashboard>,
    read_timeout: Duration,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: &RelayConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            table: RoomTable::from_config(config),
            dashboard: Arc::new(Dashboard::new()),
            read_timeout: config.read_timeout,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Tells every open WebSocket to wind down.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .route("/deregister/:room_id", any(deregister_handler))
        .route("/:room_id/:client_id", post(send_handler).delete(delete_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    pub fn new(listener: TcpListener, config: &RelayConfig) -> Self {
        Self {
            listener,
            state: AppState::new(config),
        }
    }

    pub async fn bind(config: &RelayConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The live table, for embedding and tests.
    pub fn table(&self) -> RoomTable {
        self.state.table.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server { listener, state } = self;
        let app = router(state.clone());

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("relay shutting down");
                state.begin_shutdown();
            })
            .await?;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let report = state.dashboard.report(&state.table).await;
    match serde_json::to_string(&report) {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
                (header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET")),
            ],
            body,
        )
            .into_response(),
        Err(err) => http_error(&state, &ServerError::Internal(err).to_string()),
    }
}

async fn send_handler(
    State(state): State<AppState>,
    Path((room_id, client_id)): Path<(String, String)>,
    body: String,
) -> Response {
    if body.is_empty() {
        return http_error(&state, "Empty request body");
    }
    match state.table.send(&room_id, &client_id, "POST", &body).await {
        Ok(()) => with_cors(json!({ "result": "SUCCESS" }).to_string()),
        Err(err) => http_error(&state, &format!("Failed to send the message: {err}")),
    }
}

async fn delete_handler(
    State(state): State<AppState>,
    Path((room_id, client_id)): Path<(String, String)>,
) -> Response {
    if client_id == ALL_CLIENTS {
        info!(room = %room_id, "operator removed room");
        state.table.remove_room(&room_id).await;
    } else {
        info!(room = %room_id, client = %client_id, "operator removed client");
        if let Err(err) = state.table.notify(&client_id, OFFLINE_NOTICE).await {
            debug!(client = %client_id, error = %err, "removed client was not connected");
        }
        state.table.remove(&room_id, &client_id).await;
    }
    with_cors("OK\n")
}

async fn deregister_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Response {
    state.table.remove_room(&room_id).await;
    with_cors("OK\n")
}

fn with_cors(body: impl IntoResponse) -> Response {
    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, DELETE"),
        ],
        body,
    )
        .into_response()
}

fn http_error(state: &AppState, message: &str) -> Response {
    warn!(error = message, "http request failed");
    state.dashboard.on_http_error();
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        format!("{message}\n"),
    )
        .into_response()
}
