use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::HostError;
use crate::events::bus::{EventBus, Subscriber};
use crate::events::Event;
use crate::models::server::ProxyStatus;
use crate::models::task::ActivityContext;
use crate::proxy::commands;
use crate::remote::locks::ServerLocks;
use crate::remote::runner::{SubmitOptions, TaskRunner};
use crate::storage::servers::ServerStore;
use crate::storage::settings::ProxyDefaults;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Reconciles the stored proxy status with what is running on the server
/// whenever `ProxyStatusChanged` is raised
#[derive(Clone)]
pub struct ProxyStatusListener {
    servers: Arc<ServerStore>,
    runner: Arc<TaskRunner>,
    locks: Arc<ServerLocks>,
    bus: EventBus,
    defaults: ProxyDefaults,
}

impl ProxyStatusListener {
    pub fn new(
        servers: Arc<ServerStore>,
        runner: Arc<TaskRunner>,
        locks: Arc<ServerLocks>,
        bus: EventBus,
        defaults: ProxyDefaults,
    ) -> Self {
        Self {
            servers,
            runner,
            locks,
            bus,
            defaults,
        }
    }

    /// Check the proxy and store the observed status
    pub async fn refresh(&self, server_id: Uuid) -> Result<ProxyStatus, HostError> {
        let _guard = self.locks.acquire(server_id).await;
        let Some(mut server) = self.servers.get(&server_id).await else {
            warn!(%server_id, "Proxy status changed for unknown server");
            return Err(HostError::NotFound(format!("server {}", server_id)));
        };

        let context = ActivityContext::new("CheckProxy", json!({ "server_id": server.id }));
        let check = self
            .runner
            .submit(
                vec![commands::status_check(&server, &self.defaults)],
                &server,
                SubmitOptions::sync(context),
            )
            .await;

        let status = match check {
            Ok(handle) => {
                commands::parse_status(&handle.output_text(), server.settings.is_swarm_manager)
            }
            Err(e) => {
                warn!(server_id = %server.id, "Proxy status check failed: {}", e);
                ProxyStatus::Error
            }
        };

        if server.proxy.status != status {
            info!(server_id = %server.id, from = ?server.proxy.status, to = ?status, "Proxy status changed");
        } else {
            debug!(server_id = %server.id, ?status, "Proxy status unchanged");
        }
        server.proxy.status = status;
        self.servers.save(&server).await?;

        self.bus.publish(Event::ProxyStatusChangedUi {
            team_id: server.team_id,
        });
        Ok(status)
    }

    /// Check until the proxy leaves `Starting` or the attempts are spent.
    /// A proxy still starting after the last check stays `Starting`, which
    /// never counts as applied.
    pub async fn settle(&self, server_id: Uuid) -> Result<ProxyStatus, HostError> {
        let interval = Duration::from_millis(self.defaults.status_check_interval_ms);
        let cooldown = CooldownOptions {
            base_delay: interval,
            max_delay: interval * 16,
            ..Default::default()
        };
        let attempts = self.defaults.status_check_attempts.max(1);

        let mut attempt = 0;
        loop {
            let status = self.refresh(server_id).await?;
            if status != ProxyStatus::Starting {
                return Ok(status);
            }
            if attempt + 1 >= attempts {
                warn!(%server_id, attempts, "Proxy still starting, no more status checks");
                return Ok(status);
            }

            let wait = calc_exp_backoff(&cooldown, attempt);
            debug!(%server_id, attempt, "Proxy starting, checking again in {:?}", wait);
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Subscriber for ProxyStatusListener {
    fn name(&self) -> &'static str {
        "proxy-status"
    }

    /// Checking waits for the server's lock, so it runs beside the dispatcher
    async fn handle(&self, event: &Event) -> Result<(), HostError> {
        if let Event::ProxyStatusChanged { server_id } = event {
            let listener = self.clone();
            let server_id = *server_id;
            tokio::spawn(async move {
                if let Err(e) = listener.settle(server_id).await {
                    warn!(%server_id, "Proxy status not reconciled: {}", e);
                }
            });
        }
        Ok(())
    }
}
