//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, Drivers};
use crate::errors::HostError;
use crate::events::bus::Dispatcher;
use crate::remote::runner::{self, TaskQueue, TaskRunner};
use crate::remote::shell::{RemoteShell, SshShell};
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run hostd until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), HostError> {
    info!("Initializing hostd...");

    let shell: Arc<dyn RemoteShell> = Arc::new(SshShell::new(options.ssh.clone()));

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shell, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start hostd: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shell: Arc<dyn RemoteShell>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, HostError> {
    let (app_state, drivers) = AppState::init(options, shell).await?;
    let app_state = Arc::new(app_state);
    let Drivers {
        dispatcher,
        task_queue,
    } = drivers;

    init_event_dispatcher(dispatcher, shutdown_manager, shutdown_tx.subscribe())?;

    init_task_workers(
        options.task_workers.clone(),
        app_state.runner.clone(),
        task_queue,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_socket_server {
        init_socket_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

fn init_event_dispatcher(
    dispatcher: Dispatcher,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), HostError> {
    info!(
        "Initializing event dispatcher (subscribers: {})...",
        dispatcher.subscriber_names().join(", ")
    );

    let handle = tokio::spawn(async move {
        dispatcher
            .run(Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }))
            .await;
    });

    shutdown_manager.with_event_dispatcher_handle(handle)
}

fn init_task_workers(
    options: runner::Options,
    runner: Arc<TaskRunner>,
    queue: TaskQueue,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), HostError> {
    info!("Initializing task workers...");

    let handle = tokio::spawn(async move {
        runner::run_workers(
            &options,
            runner,
            queue,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_task_workers_handle(handle)
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), HostError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(app_state);
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    socket_server_handle: Option<JoinHandle<Result<(), HostError>>>,
    task_workers_handle: Option<JoinHandle<()>>,
    event_dispatcher_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            socket_server_handle: None,
            task_workers_handle: None,
            event_dispatcher_handle: None,
        }
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), HostError>>,
    ) -> Result<(), HostError> {
        if self.socket_server_handle.is_some() {
            return Err(HostError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub fn with_task_workers_handle(&mut self, handle: JoinHandle<()>) -> Result<(), HostError> {
        if self.task_workers_handle.is_some() {
            return Err(HostError::ShutdownError("task_workers_handle already set".to_string()));
        }
        self.task_workers_handle = Some(handle);
        Ok(())
    }

    pub fn with_event_dispatcher_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), HostError> {
        if self.event_dispatcher_handle.is_some() {
            return Err(HostError::ShutdownError(
                "event_dispatcher_handle already set".to_string(),
            ));
        }
        self.event_dispatcher_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), HostError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), HostError> {
        info!("Shutting down hostd...");

        // 1. Stop accepting requests
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| HostError::ShutdownError(e.to_string()))??;
        }

        // 2. Let in-flight tasks finish
        if let Some(handle) = self.task_workers_handle.take() {
            handle.await.map_err(|e| HostError::ShutdownError(e.to_string()))?;
        }

        // 3. Event dispatcher
        if let Some(handle) = self.event_dispatcher_handle.take() {
            handle.await.map_err(|e| HostError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
