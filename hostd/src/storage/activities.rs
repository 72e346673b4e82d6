//! Durable task/activity records

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::HostError;
use crate::filesys::dir::Dir;
use crate::models::task::{Task, TaskFilter};

/// Task records, queryable by server and status
pub struct ActivityStore {
    dir: Dir,
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl ActivityStore {
    pub async fn open(dir: Dir) -> Result<Self, HostError> {
        dir.create().await?;

        let mut tasks = HashMap::new();
        for file in dir.list_files("json").await? {
            match file.read_json::<Task>().await {
                Ok(task) => {
                    tasks.insert(task.id, task);
                }
                Err(e) => {
                    warn!("Skipping unreadable activity {}: {}", file.path().display(), e);
                }
            }
        }
        info!("Loaded {} activity records", tasks.len());

        Ok(Self {
            dir,
            tasks: RwLock::new(tasks),
        })
    }

    /// Store a new record or update a live one. Records in a terminal state
    /// are immutable.
    pub async fn put(&self, task: &Task) -> Result<(), HostError> {
        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(&task.id) {
            if existing.status.is_terminal() {
                return Err(HostError::StorageError(format!(
                    "task {} is already {:?}",
                    task.id, existing.status
                )));
            }
        }

        self.dir.record(&task.id).write_json(task).await?;
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    pub async fn get(&self, id: &Uuid) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Matching tasks, oldest first
    pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }
}
