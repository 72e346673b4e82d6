//! Tracked remote task runner

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::HostError;
use crate::events::bus::EventBus;
use crate::events::Event;
use crate::models::server::Server;
use crate::models::task::{ActivityContext, OnFinish, OutputLine, Task, TaskFilter, TaskStatus};
use crate::remote::locks::ServerLocks;
use crate::remote::shell::RemoteShell;
use crate::storage::activities::ActivityStore;

/// Error recorded on tasks that were cut short by a restart
pub const INTERRUPTED: &str = "interrupted before completion";

/// Whether `submit` waits for the commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run inline and return the terminal result. The caller is expected to
    /// hold the server's lock already.
    Sync,
    /// Queue for a worker and return immediately
    Async,
}

/// Options of a task submission
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub mode: ExecutionMode,

    /// Keep running after a failed command
    pub ignore_errors: bool,

    /// Terminal status of a task whose failures were ignored
    pub ignored_failure_status: TaskStatus,

    pub on_finish: Option<OnFinish>,

    pub context: ActivityContext,
}

impl SubmitOptions {
    pub fn sync(context: ActivityContext) -> Self {
        Self {
            mode: ExecutionMode::Sync,
            ignore_errors: false,
            ignored_failure_status: TaskStatus::Finished,
            on_finish: None,
            context,
        }
    }

    pub fn asynchronous(context: ActivityContext) -> Self {
        Self {
            mode: ExecutionMode::Async,
            ..Self::sync(context)
        }
    }

    pub fn ignore_errors(mut self, ignored_failure_status: TaskStatus) -> Self {
        self.ignore_errors = true;
        self.ignored_failure_status = ignored_failure_status;
        self
    }

    pub fn on_finish(mut self, on_finish: OnFinish) -> Self {
        self.on_finish = Some(on_finish);
        self
    }
}

/// Snapshot of a submitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task: Task,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.task.id
    }

    /// Status at the time the handle was produced
    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    pub fn commands(&self) -> &[String] {
        &self.task.commands
    }

    pub fn output(&self) -> &[OutputLine] {
        &self.task.output
    }

    /// Captured output joined into one string
    pub fn output_text(&self) -> String {
        self.task
            .output
            .iter()
            .map(|l| l.line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_task(self) -> Task {
        self.task
    }
}

struct QueuedTask {
    task_id: Uuid,
    server: Server,
    ignored_failure_status: TaskStatus,
}

/// Receiving side of the async task queue
pub struct TaskQueue {
    rx: mpsc::UnboundedReceiver<QueuedTask>,
}

/// Worker pool options
#[derive(Debug, Clone)]
pub struct Options {
    /// Tasks executing at the same time
    pub workers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Executes command sequences on servers and tracks them as activities
pub struct TaskRunner {
    shell: Arc<dyn RemoteShell>,
    activities: Arc<ActivityStore>,
    bus: EventBus,
    locks: Arc<ServerLocks>,
    queue: mpsc::UnboundedSender<QueuedTask>,
}

impl TaskRunner {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        activities: Arc<ActivityStore>,
        bus: EventBus,
        locks: Arc<ServerLocks>,
    ) -> (Self, TaskQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Self {
            shell,
            activities,
            bus,
            locks,
            queue: tx,
        };
        (runner, TaskQueue { rx })
    }

    /// Submit `commands` for execution on `target`.
    ///
    /// The activity record is stored before anything is dispatched. In sync
    /// mode the first failing command aborts the sequence and its error is
    /// returned, unless `ignore_errors` is set. The completion event, if any,
    /// is raised exactly once in both modes, on failure too.
    pub async fn submit(
        &self,
        commands: Vec<String>,
        target: &Server,
        options: SubmitOptions,
    ) -> Result<TaskHandle, HostError> {
        let mut task = Task::new(target.id, commands, options.context);
        task.ignore_errors = options.ignore_errors;
        task.on_finish = options.on_finish;
        self.activities.put(&task).await?;

        debug!(
            task_id = %task.id,
            server_id = %target.id,
            commands = task.commands.len(),
            mode = ?options.mode,
            "Task submitted"
        );

        match options.mode {
            ExecutionMode::Async => {
                let handle = TaskHandle { task: task.clone() };
                self.queue
                    .send(QueuedTask {
                        task_id: task.id,
                        server: target.clone(),
                        ignored_failure_status: options.ignored_failure_status,
                    })
                    .map_err(|_| HostError::Internal("task queue is closed".to_string()))?;
                Ok(handle)
            }
            ExecutionMode::Sync => {
                let (task, failure) = self
                    .execute(task, target, options.ignored_failure_status)
                    .await?;
                match failure {
                    Some(e) if !task.ignore_errors => Err(e),
                    _ => Ok(TaskHandle { task }),
                }
            }
        }
    }

    /// Fail tasks a previous run left `Pending` or `Running` and raise their
    /// completion events, so nothing waits on a task that will never run.
    pub async fn fail_interrupted(&self) -> Result<usize, HostError> {
        let mut failed = 0;
        for status in [TaskStatus::Pending, TaskStatus::Running] {
            let filter = TaskFilter {
                server_id: None,
                status: Some(status),
            };
            for mut task in self.activities.list(&filter).await {
                warn!(
                    task_id = %task.id,
                    server_id = %task.server_id,
                    ?status,
                    "Task interrupted by restart"
                );
                task.mark_terminal(TaskStatus::Failed, Some(INTERRUPTED.to_string()));
                self.activities.put(&task).await?;
                if let Some(on_finish) = &task.on_finish {
                    self.bus.publish(Event::from_on_finish(on_finish, &task));
                }
                failed += 1;
            }
        }
        Ok(failed)
    }

    pub async fn get(&self, task_id: &Uuid) -> Option<Task> {
        self.activities.get(task_id).await
    }

    pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        self.activities.list(filter).await
    }

    /// Run a stored task to completion and raise its completion event.
    /// Returns the terminal task and the first command failure, if any.
    async fn execute(
        &self,
        mut task: Task,
        server: &Server,
        ignored_failure_status: TaskStatus,
    ) -> Result<(Task, Option<HostError>), HostError> {
        task.mark_running();
        self.activities.put(&task).await?;

        let failure = self.run_commands(&mut task, server).await;
        let status = match (&failure, task.ignore_errors) {
            (None, _) => TaskStatus::Finished,
            (Some(_), true) => ignored_failure_status,
            (Some(_), false) => TaskStatus::Failed,
        };
        task.mark_terminal(status, failure.as_ref().map(|e| e.to_string()));
        self.activities.put(&task).await?;

        info!(task_id = %task.id, server_id = %server.id, status = ?status, "Task completed");

        if let Some(on_finish) = &task.on_finish {
            self.bus.publish(Event::from_on_finish(on_finish, &task));
        }

        Ok((task, failure))
    }

    async fn run_commands(&self, task: &mut Task, server: &Server) -> Option<HostError> {
        let mut first_failure = None;
        let commands = task.commands.clone();

        for (index, command) in commands.iter().enumerate() {
            let failure = match self.shell.exec(server, command).await {
                Ok(out) => {
                    task.push_output(index, &out.output);
                    (!out.success()).then(|| HostError::Remote {
                        command: command.clone(),
                        exit_code: out.exit_code,
                        output: out.output.trim().to_string(),
                    })
                }
                Err(e) => {
                    task.push_output(index, &e.to_string());
                    Some(e)
                }
            };

            if let Some(e) = failure {
                if !task.ignore_errors {
                    warn!(task_id = %task.id, "Command {} failed, aborting: {}", index, e);
                    return Some(e);
                }
                warn!(task_id = %task.id, "Command {} failed, continuing: {}", index, e);
                first_failure.get_or_insert(e);
            }
        }

        first_failure
    }

    async fn execute_queued(&self, queued: QueuedTask) {
        let _guard = self.locks.acquire(queued.server.id).await;

        let task = match self.activities.get(&queued.task_id).await {
            Some(task) if task.status == TaskStatus::Pending => task,
            Some(task) => {
                warn!(task_id = %task.id, status = ?task.status, "Skipping task that is no longer pending");
                return;
            }
            None => {
                error!(task_id = %queued.task_id, "Queued task has no activity record");
                return;
            }
        };

        if let Err(e) = self
            .execute(task, &queued.server, queued.ignored_failure_status)
            .await
        {
            error!(task_id = %queued.task_id, "Failed to record task execution: {}", e);
        }
    }
}

/// Drain the task queue with at most `options.workers` tasks in flight
pub async fn run_workers(
    options: &Options,
    runner: Arc<TaskRunner>,
    mut queue: TaskQueue,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Task workers starting ({} slots)...", options.workers);

    let slots = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Task workers shutting down...");
                break;
            }
            queued = queue.rx.recv() => {
                let Some(queued) = queued else {
                    info!("Task queue closed");
                    break;
                };
                let Ok(permit) = slots.clone().acquire_owned().await else {
                    break;
                };
                let runner = runner.clone();
                in_flight.spawn(async move {
                    runner.execute_queued(queued).await;
                    drop(permit);
                });
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    while in_flight.join_next().await.is_some() {}
}
