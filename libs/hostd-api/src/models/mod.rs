//! hostd API models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Inbound "server validated" event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerValidatedRequest {
    pub server_uuid: String,
}

/// An event was queued for dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAccepted {
    pub event: String,
}

/// Proxy start request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartProxyRequest {
    /// Queue the start instead of waiting for it
    #[serde(default, rename = "async")]
    pub run_async: bool,

    /// Start even if stopped on purpose or already up to date
    #[serde(default)]
    pub force: bool,
}

/// Result of a proxy start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartProxyResponse {
    /// `skipped`, `up_to_date`, `applied` or `dispatched`
    pub outcome: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskSummary>,
}

/// A pipeline job that was scheduled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledStep {
    pub step: String,
    pub delay_secs: u64,
}

/// Result of a reinstall request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinstallResponse {
    pub server_id: Uuid,
    pub scheduled: Vec<ScheduledStep>,
}

/// Short view of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub server_id: Uuid,
    pub event: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Query string of `GET /tasks`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub server_id: Option<Uuid>,

    #[serde(default)]
    pub status: Option<String>,
}

/// Task list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskSummary>,
    pub total: usize,
}
