//! Configuration sync endpoint
//!
//! The HTTP surface the web UI talks to. Reads are served from the current
//! configuration snapshot and the register mirror; the only write is a full
//! configuration replace through [`ConfigStore::write`].

use anyhow::{anyhow, Result};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, thread::JoinHandle};

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Form, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::{
    core::{
        clients::ClientRegistry,
        engine::PollEngine,
        error::{GatewayError, GatewayResult},
        store::ConfigStore,
    },
    protocol::wire::{
        decode_config_form, form_credential, ClientsResponse, ConfigDocument, StatusResponse,
        ValueQuery, ValueResponse,
    },
};

/// Shared state for the axum HTTP server
#[derive(Clone)]
pub struct HttpServerState {
    pub store: Arc<ConfigStore>,
    pub engine: Arc<PollEngine>,
    pub clients: Arc<ClientRegistry>,
    pub restart_tx: flume::Sender<()>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Authentication => StatusCode::UNAUTHORIZED,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(StatusResponse::failed(self.to_string()))).into_response()
    }
}

async fn handle_config_get(State(state): State<HttpServerState>) -> Json<ConfigDocument> {
    let snapshot = state.store.read();
    let doc = ConfigDocument::from((*snapshot).clone())
        .with_telemetry(state.clients.count(), state.engine.stats().last_cycle_ms);
    Json(doc)
}

fn rejection_response(status: StatusCode, message: String) -> Response {
    (status, Json(StatusResponse::failed(message))).into_response()
}

async fn handle_config_post(
    State(state): State<HttpServerState>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    match form {
        Ok(Form(form)) => save_config(state, form).await.into_response(),
        Err(rejection) => {
            log::warn!("Configuration write rejected: {}", rejection.body_text());
            rejection_response(rejection.status(), rejection.body_text())
        }
    }
}

async fn save_config(
    state: HttpServerState,
    form: HashMap<String, String>,
) -> GatewayResult<Json<StatusResponse>> {
    log::debug!("HTTP server received configuration form with {} fields", form.len());

    // Credential first, so an unauthenticated caller learns nothing about the
    // shape of its submission.
    state.store.verify_credential(form_credential(&form))?;

    let submission = decode_config_form(&form, state.store.max_entries()).map_err(|err| {
        log::warn!("Configuration write rejected: {err}");
        GatewayError::from(err)
    })?;

    // Blocking work: lock contention with other writers plus a file sync.
    let store = Arc::clone(&state.store);
    let snapshot = tokio::task::spawn_blocking(move || {
        store.write(submission.configuration, submission.credential.as_deref())
    })
    .await
    .map_err(|err| GatewayError::Io(format!("configuration writer panicked: {err}")))??;

    Ok(Json(StatusResponse::ok(format!(
        "Configuration saved with {} mapping entries",
        snapshot.items.len()
    ))))
}

async fn handle_value_get(
    State(state): State<HttpServerState>,
    query: Result<Query<ValueQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return rejection_response(StatusCode::BAD_REQUEST, rejection.body_text())
        }
    };

    match state.engine.mirror().read(query.t, query.n) {
        Some(values) => Json(ValueResponse {
            t: query.t,
            n: query.n,
            values,
        })
        .into_response(),
        None => rejection_response(
            StatusCode::BAD_REQUEST,
            format!("range {}+{} is outside the register space", query.t, query.n),
        ),
    }
}

async fn handle_clients_get(State(state): State<HttpServerState>) -> Json<ClientsResponse> {
    Json(state.clients.snapshot().into())
}

async fn handle_restart_post(State(state): State<HttpServerState>) -> Json<StatusResponse> {
    log::info!("Restart requested over HTTP");
    // A full channel means a restart is already pending.
    let _ = state.restart_tx.try_send(());
    Json(StatusResponse::ok("Restarting"))
}

pub fn router(state: HttpServerState) -> Router {
    Router::new()
        .route("/config", get(handle_config_get).post(handle_config_post))
        .route("/value", get(handle_value_get))
        .route("/clients", get(handle_clients_get))
        .route("/restart", post(handle_restart_post))
        .with_state(state)
}

/// Binds `addr` and serves the endpoint on a dedicated thread with its own
/// runtime until `shutdown_rx` fires or its sender is dropped.
///
/// Returns the bound address, so callers passing port 0 learn the real one.
pub fn spawn_http_server(
    addr: SocketAddr,
    state: HttpServerState,
    shutdown_rx: flume::Receiver<()>,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let listener = std::net::TcpListener::bind(addr)
        .map_err(|e| anyhow!("Failed to bind HTTP server to {}: {}", addr, e))?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    log::info!("HTTP server listening on {}", local_addr);

    let handle = std::thread::Builder::new()
        .name("rtu2tcp-http".to_string())
        .spawn(move || run_http_server(listener, state, shutdown_rx))?;

    Ok((local_addr, handle))
}

fn run_http_server(
    listener: std::net::TcpListener,
    state: HttpServerState,
    shutdown_rx: flume::Receiver<()>,
) -> Result<()> {
    let app = router(state);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("Failed to create tokio runtime: {}", e))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener)?;

        let shutdown_signal = async move {
            match shutdown_rx.recv_async().await {
                Ok(()) => log::info!("HTTP server received shutdown signal, exiting"),
                Err(_) => log::info!("HTTP server shutdown channel closed, exiting"),
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow!("HTTP server error: {}", e))?;

        Ok(())
    })
}
