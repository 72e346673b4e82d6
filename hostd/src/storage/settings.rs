//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::errors::HostError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::notify::Delivery;

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Also write a rolling log file under the storage layout
    #[serde(default = "default_true")]
    pub file_logs: bool,

    #[serde(default)]
    pub http: HttpSettings,

    /// Number of task workers draining the remote task queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub proxy: ProxyDefaults,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub agents: AgentSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            file_logs: true,
            http: HttpSettings::default(),
            workers: default_workers(),
            ssh: SshSettings::default(),
            proxy: ProxyDefaults::default(),
            pipeline: PipelineSettings::default(),
            agents: AgentSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl Settings {
    /// Read the settings file, writing the defaults when it does not exist
    pub async fn load_or_init(file: &File) -> Result<Self, HostError> {
        if !file.exists().await {
            info!("No settings at {}, writing defaults", file.path().display());
            let settings = Settings::default();
            file.write_json(&settings).await?;
            return Ok(settings);
        }

        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), HostError> {
        if self.workers == 0 {
            return Err(HostError::ConfigError("workers must be at least 1".to_string()));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(HostError::ConfigError(
                "pipeline.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.notifications.webhook_token.is_some() && self.notifications.webhook_url.is_none() {
            warn!("notifications.webhook_token is set without a webhook_url");
        }
        Ok(())
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_http_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8420
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

/// How remote commands reach a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Private key passed with `-i`
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Upper bound for a single remote command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    3600
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            connect_timeout_secs: default_connect_timeout(),
            identity_file: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Where and how the proxy lives on every host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDefaults {
    /// Directory on the host holding the proxy's compose file
    #[serde(default = "default_proxy_path")]
    pub base_path: String,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Network every proxy joins in addition to the server's own
    #[serde(default = "default_network")]
    pub default_network: String,

    #[serde(default = "default_traefik_image")]
    pub traefik_image: String,

    #[serde(default = "default_caddy_image")]
    pub caddy_image: String,

    /// Status checks made while the proxy reports `Starting` before giving up
    #[serde(default = "default_status_check_attempts")]
    pub status_check_attempts: u32,

    /// Base of the backoff between those checks
    #[serde(default = "default_status_check_interval")]
    pub status_check_interval_ms: u64,
}

fn default_proxy_path() -> String {
    "/data/hostd/proxy".to_string()
}

fn default_container_name() -> String {
    "hostd-proxy".to_string()
}

fn default_network() -> String {
    "hostd".to_string()
}

fn default_traefik_image() -> String {
    "traefik:v3.1".to_string()
}

fn default_caddy_image() -> String {
    "lucaslorentz/caddy-docker-proxy:2.8-alpine".to_string()
}

fn default_status_check_attempts() -> u32 {
    8
}

fn default_status_check_interval() -> u64 {
    5_000
}

impl Default for ProxyDefaults {
    fn default() -> Self {
        Self {
            base_path: default_proxy_path(),
            container_name: default_container_name(),
            default_network: default_network(),
            traefik_image: default_traefik_image(),
            caddy_image: default_caddy_image(),
            status_check_attempts: default_status_check_attempts(),
            status_check_interval_ms: default_status_check_interval(),
        }
    }
}

/// Installation pipeline timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_security_agent_delay")]
    pub security_agent_delay_secs: u64,

    #[serde(default = "default_traffic_logger_delay")]
    pub traffic_logger_delay_secs: u64,

    #[serde(default = "default_proxy_logging_delay")]
    pub proxy_logging_delay_secs: u64,

    #[serde(default = "default_traffic_logger_deploy_delay")]
    pub traffic_logger_deploy_delay_secs: u64,

    #[serde(default = "default_validation_delay")]
    pub validation_delay_secs: u64,

    /// Attempts per step before giving up on a missing predecessor
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base")]
    pub retry_base_delay_secs: u64,
}

fn default_security_agent_delay() -> u64 {
    30
}

fn default_traffic_logger_delay() -> u64 {
    60
}

fn default_proxy_logging_delay() -> u64 {
    120
}

fn default_traffic_logger_deploy_delay() -> u64 {
    240
}

fn default_validation_delay() -> u64 {
    360
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base() -> u64 {
    15
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            security_agent_delay_secs: default_security_agent_delay(),
            traffic_logger_delay_secs: default_traffic_logger_delay(),
            proxy_logging_delay_secs: default_proxy_logging_delay(),
            traffic_logger_deploy_delay_secs: default_traffic_logger_deploy_delay(),
            validation_delay_secs: default_validation_delay(),
            max_attempts: default_max_attempts(),
            retry_base_delay_secs: default_retry_base(),
        }
    }
}

/// Containers installed by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Directory on the host holding agent configuration and data
    #[serde(default = "default_agents_path")]
    pub base_path: String,

    #[serde(default = "default_security_agent_image")]
    pub security_agent_image: String,

    #[serde(default = "default_security_agent_container")]
    pub security_agent_container: String,

    #[serde(default = "default_traffic_logger_image")]
    pub traffic_logger_image: String,

    #[serde(default = "default_traffic_logger_container")]
    pub traffic_logger_container: String,
}

fn default_agents_path() -> String {
    "/data/hostd/agents".to_string()
}

fn default_security_agent_image() -> String {
    "crowdsecurity/crowdsec:v1.6.3".to_string()
}

fn default_security_agent_container() -> String {
    "hostd-crowdsec".to_string()
}

fn default_traffic_logger_image() -> String {
    "allinurl/goaccess:1.9.3".to_string()
}

fn default_traffic_logger_container() -> String {
    "hostd-traffic-logger".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            base_path: default_agents_path(),
            security_agent_image: default_security_agent_image(),
            security_agent_container: default_security_agent_container(),
            traffic_logger_image: default_traffic_logger_image(),
            traffic_logger_container: default_traffic_logger_container(),
        }
    }
}

/// Failure notification delivery
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub webhook_url: Option<Url>,

    #[serde(default, skip_serializing)]
    pub webhook_token: Option<String>,

    #[serde(default)]
    pub delivery: Delivery,
}

impl std::fmt::Debug for NotificationSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSettings")
            .field("webhook_url", &self.webhook_url)
            .field("webhook_token", &self.webhook_token.as_ref().map(|_| "[redacted]"))
            .field("delivery", &self.delivery)
            .finish()
    }
}
