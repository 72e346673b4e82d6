//! Application state management

use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::app::options::AppOptions;
use crate::errors::HostError;
use crate::events::bus::{Dispatcher, EventBus};
use crate::notify::{Channel, LogChannel, NotificationSubscriber, Notifier, WebhookChannel};
use crate::pipeline::{Pipeline, PipelineSubscriber};
use crate::proxy::controller::ProxyController;
use crate::proxy::status::ProxyStatusListener;
use crate::remote::locks::ServerLocks;
use crate::remote::runner::{TaskQueue, TaskRunner};
use crate::remote::shell::RemoteShell;
use crate::storage::activities::ActivityStore;
use crate::storage::servers::ServerStore;

/// Main application state
pub struct AppState {
    pub servers: Arc<ServerStore>,
    pub activities: Arc<ActivityStore>,
    pub locks: Arc<ServerLocks>,
    pub bus: EventBus,
    pub runner: Arc<TaskRunner>,
    pub controller: Arc<ProxyController>,
    pub pipeline: Arc<Pipeline>,
    pub notifier: Notifier,
}

/// Pieces of the state that are driven by background workers
pub struct Drivers {
    pub dispatcher: Dispatcher,
    pub task_queue: TaskQueue,
}

impl AppState {
    /// Open the stores and wire every component. Subscribers are registered
    /// here, in the order they see each event.
    pub async fn init(
        options: &AppOptions,
        shell: Arc<dyn RemoteShell>,
    ) -> Result<(Self, Drivers), HostError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        let servers = Arc::new(ServerStore::open(options.layout.servers_dir()).await?);
        let activities = Arc::new(ActivityStore::open(options.layout.activities_dir()).await?);

        let locks = Arc::new(ServerLocks::new());
        let (bus, mut dispatcher) = EventBus::new();

        let (runner, task_queue) =
            TaskRunner::new(shell, activities.clone(), bus.clone(), locks.clone());
        let runner = Arc::new(runner);
        let interrupted = runner.fail_interrupted().await?;
        if interrupted > 0 {
            info!("Marked {} interrupted tasks as failed", interrupted);
        }

        let notifier = Notifier::new(
            notification_channels(options)?,
            bus.clone(),
            options.notifications.delivery.clone(),
        );

        let controller = Arc::new(ProxyController::new(
            servers.clone(),
            runner.clone(),
            locks.clone(),
            bus.clone(),
            options.proxy.clone(),
        ));

        let pipeline = Arc::new(Pipeline::new(
            servers.clone(),
            runner.clone(),
            locks.clone(),
            controller.clone(),
            notifier.clone(),
            options.pipeline.clone(),
            options.agents.clone(),
        ));

        dispatcher.register(Arc::new(PipelineSubscriber::new(pipeline.clone())));
        dispatcher.register(Arc::new(ProxyStatusListener::new(
            servers.clone(),
            runner.clone(),
            locks.clone(),
            bus.clone(),
            options.proxy.clone(),
        )));
        dispatcher.register(Arc::new(NotificationSubscriber::new(notifier.clone())));

        let state = Self {
            servers,
            activities,
            locks,
            bus,
            runner,
            controller,
            pipeline,
            notifier,
        };
        let drivers = Drivers {
            dispatcher,
            task_queue,
        };
        Ok((state, drivers))
    }
}

fn notification_channels(options: &AppOptions) -> Result<Vec<Arc<dyn Channel>>, HostError> {
    let mut channels: Vec<Arc<dyn Channel>> = vec![Arc::new(LogChannel)];
    if let Some(url) = &options.notifications.webhook_url {
        let token = options
            .notifications
            .webhook_token
            .clone()
            .map(SecretString::from);
        channels.push(Arc::new(WebhookChannel::new(url.clone(), token)?));
    }
    Ok(channels)
}
