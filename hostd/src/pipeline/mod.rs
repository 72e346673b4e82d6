//! Installation pipeline
//!
//! A validated server goes through a fixed chain of installation steps.
//! Every step is scheduled with its own delay from the triggering event,
//! and when due it checks that its predecessor has completed before doing
//! anything, backing off while it has not. Steps run under the server's
//! lock and the state they reach is saved in the same critical section.

pub mod scheduler;
pub mod state;
pub mod steps;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::HostError;
use crate::events::bus::Subscriber;
use crate::events::Event;
use crate::models::server::Server;
use crate::models::task::ActivityContext;
use crate::notify::{FailureNotification, Notifier};
use crate::proxy::controller::ProxyController;
use crate::remote::locks::ServerLocks;
use crate::remote::runner::{ExecutionMode, SubmitOptions, TaskRunner};
use crate::storage::servers::ServerStore;
use crate::storage::settings::{AgentSettings, PipelineSettings};
use crate::utils::calc_exp_backoff;

use scheduler::{retry_cooldown, step_delay, ScheduledJob, Scheduler};
use state::{InstallState, InstallStep, StepReadiness};

/// What a single attempt at a step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed(InstallState),
    AlreadyDone,
    /// Predecessor has not completed yet
    Blocked(InstallState),
    Failed(String),
    ServerMissing,
}

pub struct Pipeline {
    servers: Arc<ServerStore>,
    runner: Arc<TaskRunner>,
    locks: Arc<ServerLocks>,
    controller: Arc<ProxyController>,
    notifier: Notifier,
    settings: PipelineSettings,
    agents: AgentSettings,
    scheduler: Scheduler,
}

impl Pipeline {
    pub fn new(
        servers: Arc<ServerStore>,
        runner: Arc<TaskRunner>,
        locks: Arc<ServerLocks>,
        controller: Arc<ProxyController>,
        notifier: Notifier,
        settings: PipelineSettings,
        agents: AgentSettings,
    ) -> Self {
        Self {
            servers,
            runner,
            locks,
            controller,
            notifier,
            settings,
            agents,
            scheduler: Scheduler::new(),
        }
    }

    /// Jobs currently outstanding
    pub fn scheduled(&self) -> Vec<ScheduledJob> {
        self.scheduler.scheduled()
    }

    /// Schedule the steps a validated server still needs. Unknown servers
    /// are dropped.
    pub async fn on_server_validated(self: &Arc<Self>, server_uuid: &str) -> Vec<ScheduledJob> {
        let Ok(server_id) = Uuid::parse_str(server_uuid) else {
            warn!(server_uuid, "ServerValidated carries an invalid server id, dropping");
            return Vec::new();
        };
        let Some(server) = self.servers.get(&server_id).await else {
            warn!(%server_id, "ServerValidated for unknown server, dropping");
            return Vec::new();
        };

        info!(server_id = %server.id, state = ?server.install_state, "Server validated");
        self.schedule(&server, &server.install_state.remaining_steps())
    }

    /// Forget installation progress and schedule every step again
    pub async fn reinstall_all(
        self: &Arc<Self>,
        server_id: Uuid,
    ) -> Result<Vec<ScheduledJob>, HostError> {
        let server = {
            let _guard = self.locks.acquire(server_id).await;
            let mut server = self.servers.require(&server_id).await?;
            server.install_state = InstallState::Unvalidated;
            self.servers.save(&server).await?;
            server
        };

        info!(server_id = %server.id, "Reinstalling all components");
        Ok(self.schedule(&server, &InstallStep::ALL))
    }

    fn schedule(self: &Arc<Self>, server: &Server, steps: &[InstallStep]) -> Vec<ScheduledJob> {
        let mut jobs = Vec::new();
        for step in steps {
            let delay = step_delay(&self.settings, *step);
            if !self.scheduler.reserve(server.id, *step, delay) {
                debug!(server_id = %server.id, %step, "Step already scheduled");
                continue;
            }

            debug!(server_id = %server.id, %step, delay_secs = delay.as_secs(), "Scheduling step");
            let job = ScheduledJob {
                server_id: server.id,
                step: *step,
                delay,
            };
            let pipeline = Arc::clone(self);
            let (server_id, step) = (job.server_id, job.step);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                pipeline.run_job(server_id, step).await;
                pipeline.scheduler.release(server_id, step);
            });
            jobs.push(job);
        }
        jobs
    }

    /// Attempt a step until it stops being blocked or attempts run out
    async fn run_job(&self, server_id: Uuid, step: InstallStep) {
        let cooldown = retry_cooldown(&self.settings);
        let mut attempt = 0;

        loop {
            match self.run_step(server_id, step).await {
                StepOutcome::Blocked(state) if attempt + 1 < self.settings.max_attempts => {
                    let wait = calc_exp_backoff(&cooldown, attempt);
                    debug!(%server_id, %step, ?state, attempt, "Predecessor not done, retrying in {:?}", wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                StepOutcome::Blocked(state) => {
                    warn!(%server_id, %step, ?state, "Giving up on step, predecessor never completed");
                    self.notifier
                        .notify(FailureNotification::new(
                            server_id,
                            format!("Installation step {} did not run", step),
                            format!(
                                "Waited {} times for {:?} to complete; server is at {:?}",
                                self.settings.max_attempts,
                                step.requires(),
                                state
                            ),
                        ))
                        .await;
                    return;
                }
                _ => return,
            }
        }
    }

    /// One attempt at `step` under the server's lock
    pub async fn run_step(&self, server_id: Uuid, step: InstallStep) -> StepOutcome {
        let _guard = self.locks.acquire(server_id).await;
        let Some(server) = self.servers.get(&server_id).await else {
            warn!(%server_id, %step, "Server disappeared before step ran");
            return StepOutcome::ServerMissing;
        };

        match server.install_state.readiness(step) {
            StepReadiness::Done => {
                debug!(%server_id, %step, "Step already done");
                return StepOutcome::AlreadyDone;
            }
            StepReadiness::Blocked => return StepOutcome::Blocked(server.install_state),
            StepReadiness::Ready => {}
        }

        info!(%server_id, %step, "Running installation step");
        let result = match self.perform(step, server).await {
            Ok(()) => self.complete(server_id, step).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(state) => {
                info!(%server_id, %step, ?state, "Installation step completed");
                StepOutcome::Completed(state)
            }
            Err(e) => {
                error!(%server_id, %step, "Installation step failed: {}", e);
                self.notifier
                    .notify(FailureNotification::new(
                        server_id,
                        format!("Installation step {} failed", step),
                        e.to_string(),
                    ))
                    .await;
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    async fn perform(&self, step: InstallStep, mut server: Server) -> Result<(), HostError> {
        let context = ActivityContext::new(
            step.name(),
            json!({ "server_id": server.id, "step": step }),
        );

        match steps::commands(step, &server, &self.agents, self.controller.defaults()) {
            Some(commands) => {
                self.runner
                    .submit(commands, &server, SubmitOptions::sync(context))
                    .await?;
                Ok(())
            }
            None => {
                // ConfigureProxyLogging
                if !server.proxy_settings.access_logs {
                    server.proxy_settings.access_logs = true;
                    self.servers.save(&server).await?;
                }
                let outcome = self
                    .controller
                    .start_locked(server.id, ExecutionMode::Sync, false)
                    .await?;
                debug!(server_id = %server.id, ?outcome, "Proxy re-applied with access logging");
                Ok(())
            }
        }
    }

    /// Record the step on the freshly loaded server
    async fn complete(
        &self,
        server_id: Uuid,
        step: InstallStep,
    ) -> Result<InstallState, HostError> {
        let mut server = self.servers.require(&server_id).await?;
        server.install_state = server
            .install_state
            .advance(step)
            .map_err(HostError::PipelineError)?;
        self.servers.save(&server).await?;
        Ok(server.install_state)
    }
}

/// Feeds `ServerValidated` events into the pipeline
pub struct PipelineSubscriber {
    pipeline: Arc<Pipeline>,
}

impl PipelineSubscriber {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Subscriber for PipelineSubscriber {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    async fn handle(&self, event: &Event) -> Result<(), HostError> {
        if let Event::ServerValidated { server_uuid } = event {
            self.pipeline.on_server_validated(server_uuid).await;
        }
        Ok(())
    }
}
