//! Shared test harness

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use hostd::app::options::AppOptions;
use hostd::app::state::AppState;
use hostd::errors::HostError;
use hostd::events::Event;
use hostd::filesys::dir::Dir;
use hostd::models::server::{ProxyStatus, Server};
use hostd::notify::Delivery;
use hostd::remote::runner;
use hostd::remote::shell::{CommandOutput, RemoteShell};
use hostd::storage::layout::StorageLayout;

/// Records every command and answers from canned rules
#[derive(Default)]
pub struct RecordingShell {
    calls: Mutex<Vec<(Uuid, String)>>,
    failures: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, String)>>,
}

impl RecordingShell {
    /// Commands containing `pattern` exit with status 1
    pub fn fail_on(&self, pattern: &str) {
        self.failures.lock().unwrap().push(pattern.to_string());
    }

    /// Commands containing `pattern` print `output`. Later rules win.
    pub fn respond(&self, pattern: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), output.to_string()));
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn commands_for(&self, server_id: Uuid) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == server_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }
}

#[async_trait]
impl RemoteShell for RecordingShell {
    async fn exec(&self, server: &Server, command: &str) -> Result<CommandOutput, HostError> {
        self.calls
            .lock()
            .unwrap()
            .push((server.id, command.to_string()));

        if self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|p| command.contains(p.as_str()))
        {
            return Ok(CommandOutput {
                exit_code: 1,
                output: "boom".to_string(),
            });
        }

        let output = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| command.contains(p.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CommandOutput {
            exit_code: 0,
            output,
        })
    }
}

pub struct Harness {
    pub app: Arc<AppState>,
    pub shell: Arc<RecordingShell>,
    pub dir: Dir,
    pub events: broadcast::Receiver<Event>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(|_| {}).await
    }

    pub async fn with_options(customize: impl FnOnce(&mut AppOptions)) -> Self {
        let dir = Dir::create_temp_dir("hostd-test").await.unwrap();
        Self::start(dir, customize).await
    }

    /// Start an app on data a previous run left in `dir`
    pub async fn reopen(dir: Dir) -> Self {
        Self::start(dir, |_| {}).await
    }

    async fn start(dir: Dir, customize: impl FnOnce(&mut AppOptions)) -> Self {
        let mut options = AppOptions {
            layout: StorageLayout::new(dir.path()),
            ..Default::default()
        };
        options.notifications.delivery = Delivery::Immediate;
        customize(&mut options);

        let shell = Arc::new(RecordingShell::default());
        let (app, drivers) = AppState::init(&options, shell.clone()).await.unwrap();
        let app = Arc::new(app);
        let events = app.bus.observe();

        tokio::spawn(drivers.dispatcher.run(Box::pin(std::future::pending::<()>())));
        let runner = app.runner.clone();
        let worker_options = options.task_workers.clone();
        tokio::spawn(async move {
            runner::run_workers(
                &worker_options,
                runner,
                drivers.task_queue,
                Box::pin(std::future::pending::<()>()),
            )
            .await;
        });

        Self {
            app,
            shell,
            dir,
            events,
        }
    }

    pub async fn add_server(&self, server: Server) -> Server {
        self.app.servers.save(&server).await.unwrap();
        server
    }

    pub async fn server(&self, id: Uuid) -> Server {
        self.app.servers.require(&id).await.unwrap()
    }

    /// Wait for the next observed event matching `predicate`
    pub async fn wait_for(&mut self, predicate: impl Fn(&Event) -> bool) -> Event {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Wait until the stored proxy status of `id` is `status`
    pub async fn wait_for_status(&self, id: Uuid, status: ProxyStatus) {
        self.eventually(move || async move { self.server(id).await.proxy.status == status }).await;
    }

    /// Wait until at least `count` commands containing `pattern` ran
    pub async fn wait_for_commands(&self, pattern: &str, count: usize) {
        self.eventually(move || async move { self.shell.count(pattern) >= count }).await;
    }

    /// Poll `condition` until it holds
    pub async fn eventually<F, Fut>(&self, condition: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for condition")
    }

    pub async fn cleanup(self) {
        let _ = self.dir.delete().await;
    }
}
