//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hostd_api::models::{
    ErrorResponse, EventAccepted, HealthResponse, ReinstallResponse, ScheduledStep,
    ServerValidatedRequest, StartProxyRequest, StartProxyResponse, TaskListResponse, TaskQuery,
    TaskSummary, VersionResponse,
};
use tracing::warn;
use uuid::Uuid;

use crate::errors::HostError;
use crate::events::Event;
use crate::models::task::{Task, TaskFilter, TaskStatus};
use crate::proxy::controller::{SkipReason, StartOutcome};
use crate::remote::runner::{ExecutionMode, TaskHandle};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Maps a `HostError` onto a status code and JSON body
pub struct ApiError(HostError);

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HostError::NotFound(_) => StatusCode::NOT_FOUND,
            HostError::ConfigNotSynced(_) | HostError::ConfigError(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            HostError::Remote { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message })).into_response()
}

fn task_summary(task: &Task) -> TaskSummary {
    TaskSummary {
        id: task.id,
        server_id: task.server_id,
        event: task.context.event.clone(),
        status: status_name(task.status).to_string(),
        created_at: task.created_at,
        finished_at: task.finished_at,
    }
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Finished => "finished",
        TaskStatus::Failed => "failed",
    }
}

fn handle_summary(handle: &TaskHandle) -> TaskSummary {
    task_summary(&handle.clone().into_task())
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "hostd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Queue an inbound `ServerValidated` event
pub async fn server_validated_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ServerValidatedRequest>,
) -> impl IntoResponse {
    let event = Event::ServerValidated {
        server_uuid: request.server_uuid,
    };
    let name = event.name().to_string();
    state.app.bus.publish(event);
    (StatusCode::ACCEPTED, Json(EventAccepted { event: name }))
}

pub async fn servers_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.app.servers.list().await)
}

pub async fn server_handler(
    State(state): State<Arc<ServerState>>,
    Path(server_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let server = state.app.servers.require(&server_id).await?;
    Ok(Json(server))
}

pub async fn start_proxy_handler(
    State(state): State<Arc<ServerState>>,
    Path(server_id): Path<Uuid>,
    request: Option<Json<StartProxyRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let mode = if request.run_async {
        ExecutionMode::Async
    } else {
        ExecutionMode::Sync
    };

    let outcome = state
        .app
        .controller
        .start(server_id, mode, request.force)
        .await?;

    let response = match &outcome {
        StartOutcome::Skipped(reason) => StartProxyResponse {
            outcome: "skipped".to_string(),
            reason: Some(
                match reason {
                    SkipReason::NoProxy => "no_proxy",
                    SkipReason::ForceStopped => "force_stopped",
                    SkipReason::BuildServer => "build_server",
                }
                .to_string(),
            ),
            task: None,
        },
        StartOutcome::UpToDate => StartProxyResponse {
            outcome: "up_to_date".to_string(),
            reason: None,
            task: None,
        },
        StartOutcome::Applied(handle) => StartProxyResponse {
            outcome: "applied".to_string(),
            reason: None,
            task: Some(handle_summary(handle)),
        },
        StartOutcome::Dispatched(handle) => StartProxyResponse {
            outcome: "dispatched".to_string(),
            reason: None,
            task: Some(handle_summary(handle)),
        },
    };

    let status = match outcome {
        StartOutcome::Dispatched(_) => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

pub async fn stop_proxy_handler(
    State(state): State<Arc<ServerState>>,
    Path(server_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.app.controller.stop(server_id).await?;
    Ok(Json(handle_summary(&handle)))
}

pub async fn reinstall_handler(
    State(state): State<Arc<ServerState>>,
    Path(server_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.app.pipeline.reinstall_all(server_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ReinstallResponse {
            server_id,
            scheduled: jobs
                .into_iter()
                .map(|job| ScheduledStep {
                    step: job.step.name().to_string(),
                    delay_secs: job.delay.as_secs(),
                })
                .collect(),
        }),
    ))
}

pub async fn tasks_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<TaskQuery>,
) -> Response {
    let status = match query.status.as_deref().map(str::parse::<TaskStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return bad_request(e),
        None => None,
    };
    let filter = TaskFilter {
        server_id: query.server_id,
        status,
    };

    let tasks: Vec<TaskSummary> = state
        .app
        .runner
        .list(&filter)
        .await
        .iter()
        .map(task_summary)
        .collect();
    let total = tasks.len();
    Json(TaskListResponse { tasks, total }).into_response()
}

pub async fn task_handler(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .app
        .runner
        .get(&task_id)
        .await
        .ok_or_else(|| HostError::NotFound(format!("task {}", task_id)))?;
    Ok(Json(task))
}
