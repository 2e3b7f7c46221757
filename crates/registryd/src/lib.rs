//! registryd -- HTTP JSON RPC server for the MCP registry.
//!
//! Endpoints:
//! - GET  /healthz               - Liveness plus a database round-trip
//! - POST /rpc/<Operation>       - One route per registry operation
//!
//! Every RPC response body is an envelope `{ "payload" | "error" }`. In
//! `envelope` error mode all handled calls answer 200; in `status` mode a
//! failure also carries the HTTP status matching its error code.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use registry_core::facade::*;
use registry_core::{ErrorCode, ErrorMode, RegistryConfig, RegistryError};
use registry_state::SurrealHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Maximum request body size: 16 MB (data payloads travel inline).
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Shared state for all handlers.
pub struct AppState {
    pub registry: Registry,
    pub error_mode: ErrorMode,
    /// Database used by the health check; absent for in-memory stores.
    pub handle: Option<SurrealHandle>,
}

impl AppState {
    pub fn new(registry: Registry, error_mode: ErrorMode) -> Self {
        AppState {
            registry,
            error_mode,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: SurrealHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Connect the configured database and wire the registry on top of it.
    pub async fn connect(config: &RegistryConfig) -> anyhow::Result<Self> {
        let handle = SurrealHandle::connect(config.database.clone()).await?;
        let registry = Registry::from_config(Stores::surreal(&handle), config);
        Ok(AppState::new(registry, config.error_mode).with_handle(handle))
    }
}

/// HTTP status for an error code in `status` mode.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidId | ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::FailedPrecondition => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(mode: ErrorMode, result: registry_core::Result<T>) -> Response {
    let envelope = Envelope::from(result);
    let status = match (&envelope.error, mode) {
        (Some(error), ErrorMode::Status) => status_for(error.code),
        _ => StatusCode::OK,
    };
    if let Some(error) = &envelope.error {
        if error.code == ErrorCode::Internal {
            warn!(message = %error.message, "rpc failed");
        }
    }
    (status, Json(envelope)).into_response()
}

fn rejected(rejection: JsonRejection) -> RegistryError {
    RegistryError::invalid_argument(format!("malformed request body: {}", rejection.body_text()))
}

/// Generate one POST handler per operation: decode the request, call the
/// registry method, wrap the outcome in an envelope.
macro_rules! rpc_handlers {
    ($($handler:ident: $request:ty => $method:ident;)*) => {
        $(
            async fn $handler(
                State(state): State<Arc<AppState>>,
                body: Result<Json<$request>, JsonRejection>,
            ) -> Response {
                let result = match body {
                    Ok(Json(req)) => state.registry.$method(req).await,
                    Err(rejection) => Err(rejected(rejection)),
                };
                respond(state.error_mode, result)
            }
        )*
    };
}

rpc_handlers! {
    handle_create_model: CreateModelRequest => create_model;
    handle_get_model: IdRequest => get_model;
    handle_list_models: ListRequest => list_models;
    handle_create_context: CreateContextRequest => create_context;
    handle_get_context: IdRequest => get_context;
    handle_list_contexts: ListRequest => list_contexts;
    handle_create_protocol: CreateProtocolRequest => create_protocol;
    handle_get_protocol: IdRequest => get_protocol;
    handle_list_protocols: ListRequest => list_protocols;
    handle_execute_protocol: ExecuteProtocolRequest => execute_protocol;
    handle_get_protocol_status: GetProtocolStatusRequest => get_protocol_status;
    handle_list_executions: ListExecutionsRequest => list_executions;
    handle_add_data: AddDataRequest => add_data;
    handle_get_data: IdRequest => get_data;
    handle_list_data: ListDataRequest => list_data;
    handle_delete_data: IdRequest => delete_data;
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let database = match &state.handle {
        Some(handle) => handle.ping().await,
        None => Ok(()),
    };
    match database {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok" })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn handle_not_found() -> Response {
    let err = RegistryError::Remote {
        code: ErrorCode::NotFound,
        message: "unknown operation".to_string(),
    };
    (
        StatusCode::NOT_FOUND,
        Json(Envelope::<()>::from(Err(err))),
    )
        .into_response()
}

/// Build the router for `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let op = |operation: Operation| operation.path();

    Router::new()
        .route("/healthz", get(handle_health))
        .route(&op(Operation::CreateModel), post(handle_create_model))
        .route(&op(Operation::GetModel), post(handle_get_model))
        .route(&op(Operation::ListModels), post(handle_list_models))
        .route(&op(Operation::CreateContext), post(handle_create_context))
        .route(&op(Operation::GetContext), post(handle_get_context))
        .route(&op(Operation::ListContexts), post(handle_list_contexts))
        .route(&op(Operation::CreateProtocol), post(handle_create_protocol))
        .route(&op(Operation::GetProtocol), post(handle_get_protocol))
        .route(&op(Operation::ListProtocols), post(handle_list_protocols))
        .route(&op(Operation::ExecuteProtocol), post(handle_execute_protocol))
        .route(
            &op(Operation::GetProtocolStatus),
            post(handle_get_protocol_status),
        )
        .route(&op(Operation::ListExecutions), post(handle_list_executions))
        .route(&op(Operation::AddData), post(handle_add_data))
        .route(&op(Operation::GetData), post(handle_get_data))
        .route(&op(Operation::ListData), post(handle_list_data))
        .route(&op(Operation::DeleteData), post(handle_delete_data))
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, mode = %state.error_mode, "registryd listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("registryd stopped");
    Ok(())
}

/// Bind the configured address and serve until Ctrl+C or SIGTERM.
pub async fn run(config: RegistryConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::connect(&config).await?);
    let listener = TcpListener::bind(config.listen_addr()).await?;
    serve(listener, state, shutdown_signal()).await
}

/// Resolve on Ctrl+C or (on unix) SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
