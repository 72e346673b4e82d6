//! Server model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::state::InstallState;

/// Reverse proxy flavour running on a server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyType {
    #[default]
    None,
    Caddy,
    Traefik,
}

/// Observed state of the proxy process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

/// Proxy sub-state of a server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyState {
    #[serde(rename = "type", default)]
    pub proxy_type: ProxyType,

    #[serde(default)]
    pub status: ProxyStatus,

    /// Set by an explicit stop; prevents non-forced starts
    #[serde(default)]
    pub force_stop: bool,

    /// Checksum of the configuration last written to the host
    #[serde(default)]
    pub last_applied_settings: Option<String>,
}

/// User-tunable inputs to the proxy configuration render
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Emit access logs for the traffic logger to consume
    #[serde(default)]
    pub access_logs: bool,

    /// Replaces the generated compose document verbatim when set
    #[serde(default)]
    pub custom_config: Option<String>,
}

/// Capability flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub is_swarm_manager: bool,

    #[serde(default)]
    pub is_build_server: bool,
}

/// A managed host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,

    pub name: String,

    /// Team owning the server, used for UI broadcasts
    #[serde(default)]
    pub team_id: Option<u64>,

    /// SSH address
    pub ip: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default)]
    pub proxy: ProxyState,

    #[serde(default)]
    pub proxy_settings: ProxySettings,

    #[serde(default)]
    pub settings: ServerSettings,

    /// Docker networks the server's resources are attached to
    #[serde(default)]
    pub networks: Vec<String>,

    #[serde(default)]
    pub install_state: InstallState,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl Server {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            team_id: None,
            ip: ip.into(),
            port: default_ssh_port(),
            user: default_ssh_user(),
            proxy: ProxyState::default(),
            proxy_settings: ProxySettings::default(),
            settings: ServerSettings::default(),
            networks: Vec::new(),
            install_state: InstallState::default(),
        }
    }

    pub fn crowdsec_installed(&self) -> bool {
        self.install_state >= InstallState::SecurityAgentInstalled
    }

    pub fn traffic_logger_installed(&self) -> bool {
        self.install_state >= InstallState::TrafficLoggerInstalled
    }

    pub fn installation_validated(&self) -> bool {
        self.install_state == InstallState::InstallationValidated
    }

    /// `user@ip` destination for ssh
    pub fn ssh_destination(&self) -> String {
        format!("{}@{}", self.user, self.ip)
    }
}
