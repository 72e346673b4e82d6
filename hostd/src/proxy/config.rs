//! Proxy configuration rendering
//!
//! `render` is a pure function of the server record and the proxy defaults:
//! identical inputs always produce byte-identical documents, so the checksum
//! of the output can stand in for "this configuration" when deciding
//! whether the running proxy is up to date.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::HostError;
use crate::models::server::{ProxyType, Server};
use crate::storage::settings::ProxyDefaults;
use crate::utils::sha256_hex;

/// A rendered proxy compose document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfiguration {
    pub proxy_type: ProxyType,
    pub content: String,
    pub checksum: String,
}

impl ProxyConfiguration {
    pub fn new(proxy_type: ProxyType, content: String) -> Self {
        let checksum = checksum(&content);
        Self {
            proxy_type,
            content,
            checksum,
        }
    }
}

/// Content checksum of a configuration document
pub fn checksum(content: &str) -> String {
    sha256_hex(content.as_bytes())
}

#[derive(Debug, Serialize)]
struct ComposeFile {
    name: String,
    networks: BTreeMap<String, ComposeNetwork>,
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
struct ComposeNetwork {
    external: bool,
}

#[derive(Debug, Default, Serialize)]
struct ComposeService {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restart: Option<String>,
    extra_hosts: Vec<String>,
    networks: Vec<String>,
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    environment: Vec<String>,
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    command: Vec<String>,
    labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<Healthcheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deploy: Option<Deploy>,
}

#[derive(Debug, Serialize)]
struct Healthcheck {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
}

#[derive(Debug, Serialize)]
struct Deploy {
    placement: Placement,
}

#[derive(Debug, Serialize)]
struct Placement {
    constraints: Vec<String>,
}

/// Networks the proxy joins: the default network first, then the server's
/// own networks, deduplicated and sorted.
pub fn proxy_networks(server: &Server, defaults: &ProxyDefaults) -> Vec<String> {
    let mut extra: Vec<String> = server
        .networks
        .iter()
        .filter(|n| !n.is_empty() && **n != defaults.default_network)
        .cloned()
        .collect();
    extra.sort();
    extra.dedup();

    let mut networks = vec![defaults.default_network.clone()];
    networks.extend(extra);
    networks
}

/// Render the compose document for the server's proxy.
///
/// Returns `None` when there is nothing to run: no proxy type, or an empty
/// custom configuration.
pub fn render(
    server: &Server,
    defaults: &ProxyDefaults,
) -> Result<Option<ProxyConfiguration>, HostError> {
    if server.proxy.proxy_type == ProxyType::None {
        return Ok(None);
    }

    if let Some(custom) = &server.proxy_settings.custom_config {
        if custom.trim().is_empty() {
            return Ok(None);
        }
        return Ok(Some(ProxyConfiguration::new(
            server.proxy.proxy_type,
            custom.clone(),
        )));
    }

    let swarm = server.settings.is_swarm_manager;
    let networks = proxy_networks(server, defaults);

    let mut service = match server.proxy.proxy_type {
        ProxyType::Traefik => traefik_service(server, defaults, swarm),
        ProxyType::Caddy => caddy_service(server, defaults),
        ProxyType::None => return Ok(None),
    };
    service.networks = networks.clone();
    service.extra_hosts = vec!["host.docker.internal:host-gateway".to_string()];
    service.labels.insert(0, "hostd.managed=true".to_string());
    service.labels.insert(1, "hostd.proxy=true".to_string());
    if swarm {
        service.deploy = Some(Deploy {
            placement: Placement {
                constraints: vec!["node.role==manager".to_string()],
            },
        });
    } else {
        service.container_name = Some(defaults.container_name.clone());
        service.restart = Some("unless-stopped".to_string());
    }

    let compose = ComposeFile {
        name: defaults.container_name.clone(),
        networks: networks
            .into_iter()
            .map(|n| (n, ComposeNetwork { external: true }))
            .collect(),
        services: BTreeMap::from([(defaults.container_name.clone(), service)]),
    };

    let content = serde_yaml::to_string(&compose)?;
    Ok(Some(ProxyConfiguration::new(server.proxy.proxy_type, content)))
}

fn traefik_service(server: &Server, defaults: &ProxyDefaults, swarm: bool) -> ComposeService {
    let provider = if swarm { "swarm" } else { "docker" };
    let mut command = vec![
        "--ping=true".to_string(),
        "--ping.entrypoint=http".to_string(),
        "--api.dashboard=true".to_string(),
        "--entrypoints.http.address=:80".to_string(),
        "--entrypoints.https.address=:443".to_string(),
        "--entrypoints.http.http.encodequerysemicolons=true".to_string(),
        "--entrypoints.https.http.encodequerysemicolons=true".to_string(),
        format!("--providers.{provider}=true"),
        format!("--providers.{provider}.exposedbydefault=false"),
        "--providers.file.directory=/traefik/dynamic/".to_string(),
        "--providers.file.watch=true".to_string(),
        "--certificatesresolvers.letsencrypt.acme.httpchallenge=true".to_string(),
        "--certificatesresolvers.letsencrypt.acme.httpchallenge.entrypoint=http".to_string(),
        "--certificatesresolvers.letsencrypt.acme.storage=/traefik/acme.json".to_string(),
    ];
    if server.proxy_settings.access_logs {
        command.extend([
            "--accesslog=true".to_string(),
            "--accesslog.format=common".to_string(),
            "--accesslog.bufferingsize=100".to_string(),
            "--accesslog.filepath=/traefik/access.log".to_string(),
        ]);
    }

    ComposeService {
        image: defaults.traefik_image.clone(),
        ports: vec![
            "80:80".to_string(),
            "443:443".to_string(),
            "443:443/udp".to_string(),
            "8080:8080".to_string(),
        ],
        volumes: vec![
            "/var/run/docker.sock:/var/run/docker.sock:ro".to_string(),
            format!("{}:/traefik", defaults.base_path),
        ],
        command,
        labels: vec![
            "traefik.enable=true".to_string(),
            "traefik.http.routers.traefik.entrypoints=http".to_string(),
            "traefik.http.routers.traefik.service=api@internal".to_string(),
        ],
        healthcheck: Some(Healthcheck {
            test: vec![
                "CMD-SHELL".to_string(),
                "wget -qO- http://localhost:80/ping || exit 1".to_string(),
            ],
            interval: "4s".to_string(),
            timeout: "2s".to_string(),
            retries: 5,
        }),
        ..Default::default()
    }
}

fn caddy_service(server: &Server, defaults: &ProxyDefaults) -> ComposeService {
    let mut labels = Vec::new();
    if server.proxy_settings.access_logs {
        labels.push("caddy.log.output=file /data/access.log".to_string());
        labels.push("caddy.log.format=json".to_string());
    }

    ComposeService {
        image: defaults.caddy_image.clone(),
        ports: vec![
            "80:80".to_string(),
            "443:443".to_string(),
            "443:443/udp".to_string(),
        ],
        environment: vec![
            "CADDY_DOCKER_POLLING_INTERVAL=5s".to_string(),
            "CADDY_DOCKER_CADDYFILE_PATH=/dynamic/Caddyfile".to_string(),
        ],
        volumes: vec![
            "/var/run/docker.sock:/var/run/docker.sock:ro".to_string(),
            format!("{}/dynamic:/dynamic", defaults.base_path),
            format!("{}/config:/config", defaults.base_path),
            format!("{}/caddy:/data", defaults.base_path),
        ],
        labels,
        ..Default::default()
    }
}

/// Host path of the proxy's access log, when access logging is enabled
pub fn access_log_path(proxy_type: ProxyType, defaults: &ProxyDefaults) -> Option<String> {
    match proxy_type {
        ProxyType::Traefik => Some(format!("{}/access.log", defaults.base_path)),
        ProxyType::Caddy => Some(format!("{}/caddy/access.log", defaults.base_path)),
        ProxyType::None => None,
    }
}

/// Top-level file of the dynamic configuration directory, created once and
/// never overwritten: `(file name, contents)`.
pub fn dynamic_bootstrap(proxy_type: ProxyType) -> Option<(&'static str, &'static str)> {
    match proxy_type {
        ProxyType::Traefik => Some((
            "hostd.yaml",
            "# Managed by hostd. Routers and services live in sibling files.\nhttp: {}\n",
        )),
        ProxyType::Caddy => Some(("Caddyfile", "import /dynamic/*.caddy\n")),
        ProxyType::None => None,
    }
}
