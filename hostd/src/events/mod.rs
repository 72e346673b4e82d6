//! Domain events

pub mod bus;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::task::{OnFinish, Task, TaskStatus};
use crate::notify::FailureNotification;

pub const SERVER_VALIDATED: &str = "ServerValidated";
pub const PROXY_STATUS_CHANGED: &str = "ProxyStatusChanged";
pub const PROXY_STATUS_CHANGED_UI: &str = "ProxyStatusChangedUI";
pub const TASK_FINISHED: &str = "TaskFinished";
pub const NOTIFICATION_REQUESTED: &str = "NotificationRequested";

/// Everything that flows over the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A server passed validation and is ready for installation
    ServerValidated { server_uuid: String },

    /// The proxy on a server may have changed state
    ProxyStatusChanged { server_id: Uuid },

    /// UI broadcast for everyone watching a team's servers
    ProxyStatusChangedUi { team_id: Option<u64> },

    /// Generic completion event of a tracked task
    TaskFinished {
        task_id: Uuid,
        server_id: Uuid,
        name: String,
        status: TaskStatus,
        data: serde_json::Value,
    },

    /// A failure notification waiting for queued delivery
    NotificationRequested(FailureNotification),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ServerValidated { .. } => SERVER_VALIDATED,
            Event::ProxyStatusChanged { .. } => PROXY_STATUS_CHANGED,
            Event::ProxyStatusChangedUi { .. } => PROXY_STATUS_CHANGED_UI,
            Event::TaskFinished { .. } => TASK_FINISHED,
            Event::NotificationRequested(_) => NOTIFICATION_REQUESTED,
        }
    }

    /// Turn a task's completion descriptor into the event to raise.
    ///
    /// Descriptors naming a known event with a payload it understands map
    /// to that event; anything else is raised as `TaskFinished` carrying the
    /// opaque payload untouched.
    pub fn from_on_finish(on_finish: &OnFinish, task: &Task) -> Event {
        if on_finish.event == PROXY_STATUS_CHANGED {
            let server_id = on_finish
                .data
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok());
            if let Some(server_id) = server_id {
                return Event::ProxyStatusChanged { server_id };
            }
        }

        Event::TaskFinished {
            task_id: task.id,
            server_id: task.server_id,
            name: on_finish.event.clone(),
            status: task.status,
            data: on_finish.data.clone(),
        }
    }
}
