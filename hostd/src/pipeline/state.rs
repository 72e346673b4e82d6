//! Installation state machine

use serde::{Deserialize, Serialize};

/// Installation progress of a server. Variants are ordered; a server in a
/// later state has completed every earlier step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    #[default]
    Unvalidated,
    SecurityAgentInstalled,
    TrafficLoggerInstalled,
    ProxyLoggingConfigured,
    TrafficLoggerDeployed,
    InstallationValidated,
}

/// One installation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStep {
    InstallSecurityAgent,
    InstallTrafficLogger,
    ConfigureProxyLogging,
    DeployTrafficLogger,
    ValidateInstallation,
}

impl InstallStep {
    /// Every step, in execution order
    pub const ALL: [InstallStep; 5] = [
        InstallStep::InstallSecurityAgent,
        InstallStep::InstallTrafficLogger,
        InstallStep::ConfigureProxyLogging,
        InstallStep::DeployTrafficLogger,
        InstallStep::ValidateInstallation,
    ];

    /// State the server must be in for this step to run
    pub fn requires(&self) -> InstallState {
        match self {
            InstallStep::InstallSecurityAgent => InstallState::Unvalidated,
            InstallStep::InstallTrafficLogger => InstallState::SecurityAgentInstalled,
            InstallStep::ConfigureProxyLogging => InstallState::TrafficLoggerInstalled,
            InstallStep::DeployTrafficLogger => InstallState::ProxyLoggingConfigured,
            InstallStep::ValidateInstallation => InstallState::TrafficLoggerDeployed,
        }
    }

    /// State reached once this step succeeds
    pub fn completes(&self) -> InstallState {
        match self {
            InstallStep::InstallSecurityAgent => InstallState::SecurityAgentInstalled,
            InstallStep::InstallTrafficLogger => InstallState::TrafficLoggerInstalled,
            InstallStep::ConfigureProxyLogging => InstallState::ProxyLoggingConfigured,
            InstallStep::DeployTrafficLogger => InstallState::TrafficLoggerDeployed,
            InstallStep::ValidateInstallation => InstallState::InstallationValidated,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstallStep::InstallSecurityAgent => "install_security_agent",
            InstallStep::InstallTrafficLogger => "install_traffic_logger",
            InstallStep::ConfigureProxyLogging => "configure_proxy_logging",
            InstallStep::DeployTrafficLogger => "deploy_traffic_logger",
            InstallStep::ValidateInstallation => "validate_installation",
        }
    }
}

impl std::fmt::Display for InstallStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a step stands relative to a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReadiness {
    /// Already completed; running it again is a no-op
    Done,
    /// Predecessor completed; the step may run
    Ready,
    /// Predecessor not completed yet
    Blocked,
}

impl InstallState {
    pub fn readiness(&self, step: InstallStep) -> StepReadiness {
        if *self >= step.completes() {
            StepReadiness::Done
        } else if *self == step.requires() {
            StepReadiness::Ready
        } else {
            StepReadiness::Blocked
        }
    }

    /// Apply a completed step. Only the next step in order is accepted.
    pub fn advance(&self, step: InstallStep) -> Result<InstallState, String> {
        match (self, step) {
            (InstallState::Unvalidated, InstallStep::InstallSecurityAgent)
            | (InstallState::SecurityAgentInstalled, InstallStep::InstallTrafficLogger)
            | (InstallState::TrafficLoggerInstalled, InstallStep::ConfigureProxyLogging)
            | (InstallState::ProxyLoggingConfigured, InstallStep::DeployTrafficLogger)
            | (InstallState::TrafficLoggerDeployed, InstallStep::ValidateInstallation) => {
                Ok(step.completes())
            }
            (state, step) => Err(format!("Invalid transition: {:?} -> {}", state, step)),
        }
    }

    /// Steps still to run from this state
    pub fn remaining_steps(&self) -> Vec<InstallStep> {
        InstallStep::ALL
            .into_iter()
            .filter(|step| self.readiness(*step) != StepReadiness::Done)
            .collect()
    }
}
