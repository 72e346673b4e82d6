//! Proxy lifecycle controller

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::HostError;
use crate::events::bus::EventBus;
use crate::events::{Event, PROXY_STATUS_CHANGED};
use crate::models::server::{ProxyStatus, Server};
use crate::models::task::{ActivityContext, OnFinish};
use crate::proxy::commands;
use crate::proxy::config::{render, ProxyConfiguration};
use crate::remote::locks::ServerLocks;
use crate::remote::runner::{ExecutionMode, SubmitOptions, TaskHandle, TaskRunner};
use crate::storage::servers::ServerStore;
use crate::storage::settings::ProxyDefaults;

/// Why a start left the proxy alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoProxy,
    ForceStopped,
    BuildServer,
}

/// Result of `ProxyController::start`
#[derive(Debug)]
pub enum StartOutcome {
    /// Nothing to do for this server
    Skipped(SkipReason),
    /// The applied configuration already matches the rendered one
    UpToDate,
    /// Applied inline
    Applied(TaskHandle),
    /// Queued; completion raises `ProxyStatusChanged`
    Dispatched(TaskHandle),
}

impl StartOutcome {
    /// Handle of the start task, if one was created
    pub fn handle(&self) -> Option<&TaskHandle> {
        match self {
            StartOutcome::Applied(handle) | StartOutcome::Dispatched(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Decides when and how the proxy of a server is (re)started
pub struct ProxyController {
    servers: Arc<ServerStore>,
    runner: Arc<TaskRunner>,
    locks: Arc<ServerLocks>,
    bus: EventBus,
    defaults: ProxyDefaults,
}

impl ProxyController {
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

    pub fn defaults(&self) -> &ProxyDefaults {
        &self.defaults
    }

    /// Start or re-apply the proxy of a server under its lock
    pub async fn start(
        &self,
        server_id: Uuid,
        mode: ExecutionMode,
        force: bool,
    ) -> Result<StartOutcome, HostError> {
        let _guard = self.locks.acquire(server_id).await;
        self.start_locked(server_id, mode, force).await
    }

    /// `start` for callers already holding the server's lock
    pub async fn start_locked(
        &self,
        server_id: Uuid,
        mode: ExecutionMode,
        force: bool,
    ) -> Result<StartOutcome, HostError> {
        let mut server = self.servers.require(&server_id).await?;

        if !force {
            if let Some(reason) = skip_reason(&server) {
                debug!(server_id = %server.id, ?reason, "Not starting proxy");
                return Ok(StartOutcome::Skipped(reason));
            }
        }

        let config = render(&server, &self.defaults)?;
        if !force {
            if let Some(config) = &config {
                if is_applied(&server, config) {
                    debug!(server_id = %server.id, "Proxy configuration unchanged, nothing to apply");
                    return Ok(StartOutcome::UpToDate);
                }
            }
        }

        info!(server_id = %server.id, proxy_type = ?server.proxy.proxy_type, force, "Starting proxy");
        self.set_status(&mut server, ProxyStatus::Starting).await?;

        let Some(config) = config else {
            error!(server_id = %server.id, "Proxy configuration rendered empty");
            self.set_status(&mut server, ProxyStatus::Error).await?;
            return Err(HostError::ConfigNotSynced(server.id));
        };

        if let Err(e) = self.save_configuration(&mut server, &config).await {
            self.set_status(&mut server, ProxyStatus::Error).await?;
            return Err(e);
        }

        let start_commands = if server.settings.is_swarm_manager {
            commands::swarm_start(&self.defaults)
        } else {
            commands::single_host_start(&server, &self.defaults, &config)
        };
        let context = ActivityContext::new(
            "StartProxy",
            json!({
                "server_id": server.id,
                "proxy_type": config.proxy_type,
                "checksum": config.checksum,
                "force": force,
            }),
        );

        match mode {
            ExecutionMode::Async => {
                let options = SubmitOptions::asynchronous(context)
                    .on_finish(OnFinish::new(PROXY_STATUS_CHANGED, json!(server.id)));
                let handle = self.runner.submit(start_commands, &server, options).await?;
                info!(server_id = %server.id, task_id = %handle.id(), "Proxy start dispatched");
                Ok(StartOutcome::Dispatched(handle))
            }
            ExecutionMode::Sync => {
                let result = self
                    .runner
                    .submit(start_commands, &server, SubmitOptions::sync(context))
                    .await;
                match result {
                    Ok(handle) => {
                        server.proxy.proxy_type = config.proxy_type;
                        self.servers.save(&server).await?;
                        self.bus.publish(Event::ProxyStatusChanged {
                            server_id: server.id,
                        });
                        info!(server_id = %server.id, "Proxy started");
                        Ok(StartOutcome::Applied(handle))
                    }
                    Err(e) => {
                        warn!(server_id = %server.id, "Proxy start failed: {}", e);
                        self.set_status(&mut server, ProxyStatus::Error).await?;
                        self.bus.publish(Event::ProxyStatusChanged {
                            server_id: server.id,
                        });
                        Err(e)
                    }
                }
            }
        }
    }

    /// Stop the proxy and keep it stopped until a forced start
    pub async fn stop(&self, server_id: Uuid) -> Result<TaskHandle, HostError> {
        let _guard = self.locks.acquire(server_id).await;
        let mut server = self.servers.require(&server_id).await?;

        info!(server_id = %server.id, "Stopping proxy");
        server.proxy.force_stop = true;
        server.proxy.last_applied_settings = None;
        self.servers.save(&server).await?;

        let context = ActivityContext::new("StopProxy", json!({ "server_id": server.id }));
        let handle = self
            .runner
            .submit(
                commands::stop(&server, &self.defaults),
                &server,
                SubmitOptions::sync(context),
            )
            .await?;

        self.set_status(&mut server, ProxyStatus::Stopped).await?;
        Ok(handle)
    }

    /// Whether the rendered configuration differs from the applied one
    pub async fn is_pending_apply(&self, server_id: Uuid) -> Result<bool, HostError> {
        let server = self.servers.require(&server_id).await?;
        let config = render(&server, &self.defaults)?;
        Ok(match config {
            Some(config) => server.proxy.last_applied_settings.as_deref() != Some(&config.checksum),
            None => server.proxy.last_applied_settings.is_some(),
        })
    }

    /// Write the configuration to the host, then record its checksum as
    /// the one about to be applied
    async fn save_configuration(
        &self,
        server: &mut Server,
        config: &ProxyConfiguration,
    ) -> Result<(), HostError> {
        let context = ActivityContext::new(
            "SaveProxyConfiguration",
            json!({ "server_id": server.id, "checksum": config.checksum }),
        );
        self.runner
            .submit(
                commands::save_configuration(&self.defaults, config),
                server,
                SubmitOptions::sync(context),
            )
            .await?;

        server.proxy.last_applied_settings = Some(config.checksum.clone());
        self.servers.save(server).await
    }

    async fn set_status(&self, server: &mut Server, status: ProxyStatus) -> Result<(), HostError> {
        server.proxy.status = status;
        self.servers.save(server).await?;
        self.bus.publish(Event::ProxyStatusChangedUi {
            team_id: server.team_id,
        });
        Ok(())
    }
}

/// Servers whose proxy is never started without `force`
pub fn skip_reason(server: &Server) -> Option<SkipReason> {
    if server.proxy.proxy_type == crate::models::server::ProxyType::None {
        Some(SkipReason::NoProxy)
    } else if server.proxy.force_stop {
        Some(SkipReason::ForceStopped)
    } else if server.settings.is_build_server {
        Some(SkipReason::BuildServer)
    } else {
        None
    }
}

/// The configuration was written and a status check has since confirmed the proxy
/// running. The checksum alone only says what was about to be applied.
fn is_applied(server: &Server, config: &ProxyConfiguration) -> bool {
    server.proxy.last_applied_settings.as_deref() == Some(config.checksum.as_str())
        && server.proxy.status == ProxyStatus::Running
}
