//! Command transport to managed hosts

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::HostError;
use crate::models::server::Server;
use crate::storage::settings::SshSettings;

/// Result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a single shell command on a server.
///
/// `Err` means the command could not be run at all; a command that ran and
/// exited non-zero is an `Ok` with its exit code.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, server: &Server, command: &str) -> Result<CommandOutput, HostError>;
}

/// Runs commands through the system `ssh` client
pub struct SshShell {
    settings: SshSettings,
}

impl SshShell {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn args(&self, server: &Server, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
        ];
        if let Some(identity) = &self.settings.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push("-p".to_string());
        args.push(server.port.to_string());
        args.push(server.ssh_destination());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, server: &Server, command: &str) -> Result<CommandOutput, HostError> {
        debug!(server_id = %server.id, "ssh {}: {}", server.ssh_destination(), command);

        let child = Command::new(&self.settings.binary)
            .args(self.args(server, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let timeout = Duration::from_secs(self.settings.command_timeout_secs);
        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| {
                HostError::Remote {
                    command: command.to_string(),
                    exit_code: -1,
                    output: format!("timed out after {:?}", timeout),
                }
            })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}
