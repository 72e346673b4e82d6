//! Delayed step jobs

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::state::InstallStep;
use crate::storage::settings::PipelineSettings;
use crate::utils::CooldownOptions;

/// Delay between the triggering event and a step's first attempt
pub fn step_delay(settings: &PipelineSettings, step: InstallStep) -> Duration {
    let secs = match step {
        InstallStep::InstallSecurityAgent => settings.security_agent_delay_secs,
        InstallStep::InstallTrafficLogger => settings.traffic_logger_delay_secs,
        InstallStep::ConfigureProxyLogging => settings.proxy_logging_delay_secs,
        InstallStep::DeployTrafficLogger => settings.traffic_logger_deploy_delay_secs,
        InstallStep::ValidateInstallation => settings.validation_delay_secs,
    };
    Duration::from_secs(secs)
}

/// Backoff used while a step waits for its predecessor
pub fn retry_cooldown(settings: &PipelineSettings) -> CooldownOptions {
    CooldownOptions {
        base_delay: Duration::from_secs(settings.retry_base_delay_secs),
        ..Default::default()
    }
}

/// A step job waiting to run or running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub server_id: Uuid,
    pub step: InstallStep,
    pub delay: Duration,
}

/// Tracks outstanding step jobs so a step is never queued twice for the
/// same server
#[derive(Debug, Default)]
pub struct Scheduler {
    pending: Mutex<HashMap<(Uuid, InstallStep), Duration>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the `(server, step)` slot. Returns false when a job for it is
    /// already outstanding.
    pub fn reserve(&self, server_id: Uuid, step: InstallStep, delay: Duration) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains_key(&(server_id, step)) {
            return false;
        }
        pending.insert((server_id, step), delay);
        true
    }

    pub fn release(&self, server_id: Uuid, step: InstallStep) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&(server_id, step));
    }

    /// Outstanding jobs ordered by delay
    pub fn scheduled(&self) -> Vec<ScheduledJob> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<ScheduledJob> = pending
            .iter()
            .map(|((server_id, step), delay)| ScheduledJob {
                server_id: *server_id,
                step: *step,
                delay: *delay,
            })
            .collect();
        jobs.sort_by_key(|job| (job.delay, job.server_id));
        jobs
    }
}
