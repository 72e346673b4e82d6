//! Shell command sequences for the proxy

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::models::server::{ProxyStatus, Server};
use crate::proxy::config::{dynamic_bootstrap, proxy_networks, ProxyConfiguration};
use crate::storage::settings::ProxyDefaults;
use crate::utils::shell_quote;

pub const COMPOSE_FILE: &str = "docker-compose.yml";

fn write_file(path: &str, contents: &str) -> String {
    format!(
        "echo {} | base64 -d | tee {} > /dev/null",
        STANDARD.encode(contents),
        shell_quote(path)
    )
}

/// Write the compose document into the proxy directory
pub fn save_configuration(defaults: &ProxyDefaults, config: &ProxyConfiguration) -> Vec<String> {
    let base = shell_quote(&defaults.base_path);
    vec![
        format!("mkdir -p {}", base),
        write_file(
            &format!("{}/{}", defaults.base_path, COMPOSE_FILE),
            &config.content,
        ),
    ]
}

/// Deploy the proxy as a swarm stack
pub fn swarm_start(defaults: &ProxyDefaults) -> Vec<String> {
    vec![
        format!(
            "docker network create --driver overlay --attachable {} >/dev/null 2>&1 || true",
            shell_quote(&defaults.default_network)
        ),
        format!(
            "cd {} && docker stack deploy --detach=true -c {} {}",
            shell_quote(&defaults.base_path),
            COMPOSE_FILE,
            shell_quote(&defaults.container_name)
        ),
    ]
}

/// Replace the proxy container on a single host
pub fn single_host_start(
    server: &Server,
    defaults: &ProxyDefaults,
    config: &ProxyConfiguration,
) -> Vec<String> {
    let base = shell_quote(&defaults.base_path);
    let name = shell_quote(&defaults.container_name);
    let mut commands = vec![format!("mkdir -p {}/dynamic", base)];

    if let Some((file, contents)) = dynamic_bootstrap(config.proxy_type) {
        let path = format!("{}/dynamic/{}", defaults.base_path, file);
        commands.push(format!(
            "[ -f {} ] || {}",
            shell_quote(&path),
            write_file(&path, contents)
        ));
    }

    commands.push(format!(
        "docker network create --attachable {} >/dev/null 2>&1 || true",
        shell_quote(&defaults.default_network)
    ));
    commands.push(format!("cd {} && docker compose pull", base));
    commands.push(format!(
        "if docker ps -a --format '{{{{.Names}}}}' | grep -qx {name}; then docker stop -t 10 {name} >/dev/null 2>&1; docker rm -f {name} >/dev/null 2>&1 || true; fi"
    ));
    commands.push(format!(
        "cd {} && docker compose up -d --wait --remove-orphans",
        base
    ));

    for network in proxy_networks(server, defaults)
        .iter()
        .filter(|n| **n != defaults.default_network)
    {
        commands.push(format!(
            "docker network connect {} {} >/dev/null 2>&1 || true",
            shell_quote(network),
            name
        ));
    }

    commands
}

/// Remove the proxy, tolerating its absence
pub fn stop(server: &Server, defaults: &ProxyDefaults) -> Vec<String> {
    let name = shell_quote(&defaults.container_name);
    if server.settings.is_swarm_manager {
        vec![format!("docker stack rm {} >/dev/null 2>&1 || true", name)]
    } else {
        vec![format!("docker rm -f {} >/dev/null 2>&1 || true", name)]
    }
}

/// Print the proxy's state in a form `parse_status` understands. Always
/// exits zero.
pub fn status_check(server: &Server, defaults: &ProxyDefaults) -> String {
    let name = shell_quote(&defaults.container_name);
    if server.settings.is_swarm_manager {
        format!(
            "docker service ls --filter name={name}_{name} --format '{{{{.Replicas}}}}' 2>/dev/null || true"
        )
    } else {
        format!(
            "docker inspect --format '{{{{.State.Status}}}} {{{{if .State.Health}}}}{{{{.State.Health.Status}}}}{{{{end}}}}' {name} 2>/dev/null || echo missing"
        )
    }
}

/// Interpret the output of `status_check`
pub fn parse_status(output: &str, swarm: bool) -> ProxyStatus {
    let output = output.trim();
    if swarm {
        let Some((running, desired)) = output.split_once('/') else {
            return ProxyStatus::Stopped;
        };
        return match (running.trim().parse::<u32>(), desired.trim().parse::<u32>()) {
            (Ok(r), Ok(d)) if d > 0 && r >= d => ProxyStatus::Running,
            (Ok(_), Ok(d)) if d > 0 => ProxyStatus::Starting,
            (Ok(_), Ok(_)) => ProxyStatus::Stopped,
            _ => ProxyStatus::Error,
        };
    }

    let mut parts = output.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) | (Some("missing"), _) => ProxyStatus::Stopped,
        (Some("running"), None) | (Some("running"), Some("healthy")) => ProxyStatus::Running,
        (Some("running"), Some("starting")) | (Some("restarting"), _) | (Some("created"), _) => {
            ProxyStatus::Starting
        }
        (Some("exited"), _) => ProxyStatus::Stopped,
        _ => ProxyStatus::Error,
    }
}
