//! Application configuration options

use std::time::Duration;

use crate::notify::Delivery;
use crate::remote::runner;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{
    AgentSettings, NotificationSettings, PipelineSettings, ProxyDefaults, Settings, SshSettings,
};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Task worker pool
    pub task_workers: runner::Options,

    pub ssh: SshSettings,

    pub proxy: ProxyDefaults,

    pub pipeline: PipelineSettings,

    pub agents: AgentSettings,

    pub notifications: NotificationSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            task_workers: runner::Options::default(),
            ssh: SshSettings::default(),
            proxy: ProxyDefaults::default(),
            pipeline: PipelineSettings::default(),
            agents: AgentSettings::default(),
            notifications: NotificationSettings {
                delivery: Delivery::high_priority(),
                ..Default::default()
            },
        }
    }
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            enable_socket_server: settings.http.enabled,
            server: ServerOptions {
                host: settings.http.host.clone(),
                port: settings.http.port,
            },
            task_workers: runner::Options {
                workers: settings.workers,
            },
            ssh: settings.ssh.clone(),
            proxy: settings.proxy.clone(),
            pipeline: settings.pipeline.clone(),
            agents: settings.agents.clone(),
            notifications: settings.notifications.clone(),
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
        }
    }
}
