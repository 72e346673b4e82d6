//! Remote commands of the installation steps

use crate::models::server::{ProxyType, Server};
use crate::pipeline::state::InstallStep;
use crate::proxy::config::access_log_path;
use crate::storage::settings::{AgentSettings, ProxyDefaults};
use crate::utils::shell_quote;

/// Commands run for `step`, or `None` for steps that are not a plain
/// command sequence
pub fn commands(
    step: InstallStep,
    server: &Server,
    agents: &AgentSettings,
    proxy: &ProxyDefaults,
) -> Option<Vec<String>> {
    match step {
        InstallStep::InstallSecurityAgent => Some(install_security_agent(server, agents, proxy)),
        InstallStep::InstallTrafficLogger => Some(install_traffic_logger(agents)),
        InstallStep::ConfigureProxyLogging => None,
        InstallStep::DeployTrafficLogger => Some(deploy_traffic_logger(server, agents, proxy)),
        InstallStep::ValidateInstallation => Some(validate_installation(server, agents)),
    }
}

fn security_collections(proxy_type: ProxyType) -> &'static str {
    match proxy_type {
        ProxyType::Traefik => "crowdsecurity/linux crowdsecurity/traefik",
        ProxyType::Caddy => "crowdsecurity/linux crowdsecurity/caddy",
        ProxyType::None => "crowdsecurity/linux",
    }
}

fn install_security_agent(
    server: &Server,
    agents: &AgentSettings,
    proxy: &ProxyDefaults,
) -> Vec<String> {
    let dir = format!("{}/crowdsec", agents.base_path);
    let name = shell_quote(&agents.security_agent_container);
    vec![
        format!("mkdir -p {}/config {}/data", shell_quote(&dir), shell_quote(&dir)),
        format!(
            "docker network create --attachable {} >/dev/null 2>&1 || true",
            shell_quote(&proxy.default_network)
        ),
        format!("docker pull {}", shell_quote(&agents.security_agent_image)),
        format!("docker rm -f {} >/dev/null 2>&1 || true", name),
        format!(
            "docker run -d --name {name} --restart unless-stopped --network {network} \
             -e COLLECTIONS={collections} \
             -v {config}:/etc/crowdsec -v {data}:/var/lib/crowdsec/data \
             -v /var/log:/var/log/host:ro -v {proxy_dir}:/var/log/proxy:ro {image}",
            network = shell_quote(&proxy.default_network),
            collections = shell_quote(security_collections(server.proxy.proxy_type)),
            config = shell_quote(&format!("{}/config", dir)),
            data = shell_quote(&format!("{}/data", dir)),
            proxy_dir = shell_quote(&proxy.base_path),
            image = shell_quote(&agents.security_agent_image),
        ),
    ]
}

fn install_traffic_logger(agents: &AgentSettings) -> Vec<String> {
    let dir = format!("{}/traffic-logger", agents.base_path);
    vec![
        format!("mkdir -p {}/report", shell_quote(&dir)),
        format!("docker pull {}", shell_quote(&agents.traffic_logger_image)),
    ]
}

fn log_format(proxy_type: ProxyType) -> &'static str {
    match proxy_type {
        ProxyType::Caddy => "CADDY",
        _ => "COMMON",
    }
}

fn deploy_traffic_logger(
    server: &Server,
    agents: &AgentSettings,
    proxy: &ProxyDefaults,
) -> Vec<String> {
    let name = shell_quote(&agents.traffic_logger_container);
    let mut commands = vec![format!("docker rm -f {} >/dev/null 2>&1 || true", name)];

    // Nothing to read without a proxy; the container is only removed
    let Some(log) = access_log_path(server.proxy.proxy_type, proxy) else {
        return commands;
    };

    commands.push(format!("touch {}", shell_quote(&log)));
    commands.push(format!(
        "docker run -d --name {name} --restart unless-stopped \
         -v {log}:/logs/access.log:ro -v {report}:/srv/report {image} \
         /logs/access.log --log-format={format} --real-time-html -o /srv/report/index.html",
        log = shell_quote(&log),
        report = shell_quote(&format!("{}/traffic-logger/report", agents.base_path)),
        image = shell_quote(&agents.traffic_logger_image),
        format = log_format(server.proxy.proxy_type),
    ));
    commands
}

fn running_check(container: &str) -> String {
    format!(
        "docker inspect --format '{{{{.State.Running}}}}' {} | grep -qx true",
        shell_quote(container)
    )
}

fn validate_installation(server: &Server, agents: &AgentSettings) -> Vec<String> {
    let mut commands = vec![
        running_check(&agents.security_agent_container),
        format!(
            "docker exec {} cscli lapi status",
            shell_quote(&agents.security_agent_container)
        ),
    ];
    if server.proxy.proxy_type != ProxyType::None {
        commands.push(running_check(&agents.traffic_logger_container));
    }
    commands
}
