//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::HostError;
use crate::server::handlers::{
    health_handler, reinstall_handler, server_handler, server_validated_handler, servers_handler,
    start_proxy_handler, stop_proxy_handler, task_handler, tasks_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the local API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Inbound events
        .route("/events/server-validated", post(server_validated_handler))
        // Servers
        .route("/servers", get(servers_handler))
        .route("/servers/{id}", get(server_handler))
        .route("/servers/{id}/proxy/start", post(start_proxy_handler))
        .route("/servers/{id}/proxy/stop", post(stop_proxy_handler))
        .route("/servers/{id}/reinstall", post(reinstall_handler))
        // Tasks
        .route("/tasks", get(tasks_handler))
        .route("/tasks/{id}", get(task_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), HostError>>, HostError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| HostError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| HostError::ServerError(e.to_string()))
    });

    Ok(handle)
}
