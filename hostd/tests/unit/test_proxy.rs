//! Proxy controller tests

use hostd::errors::HostError;
use hostd::events::Event;
use hostd::models::server::{ProxyStatus, ProxyType, Server};
use hostd::proxy::config::render;
use hostd::proxy::controller::{SkipReason, StartOutcome};
use hostd::remote::runner::ExecutionMode;
use hostd::storage::settings::ProxyDefaults;
use uuid::Uuid;

use crate::common::Harness;

fn server_with(proxy_type: ProxyType) -> Server {
    let mut server = Server::new("edge-1", "10.0.0.5");
    server.proxy.proxy_type = proxy_type;
    server
}

#[tokio::test]
async fn test_start_without_proxy_is_noop() {
    let h = Harness::new().await;
    let server = h.add_server(server_with(ProxyType::None)).await;

    let outcome = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();

    assert!(matches!(outcome, StartOutcome::Skipped(SkipReason::NoProxy)));
    assert!(h.shell.commands().is_empty());
    assert_eq!(h.server(server.id).await.proxy.status, ProxyStatus::Stopped);
    h.cleanup().await;
}

#[tokio::test]
async fn test_force_stopped_proxy_is_not_started() {
    let h = Harness::new().await;
    let mut server = server_with(ProxyType::Caddy);
    server.proxy.force_stop = true;
    let server = h.add_server(server).await;

    let outcome = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        StartOutcome::Skipped(SkipReason::ForceStopped)
    ));
    assert!(h.shell.commands().is_empty());
    assert_eq!(h.server(server.id).await.proxy.status, ProxyStatus::Stopped);
    h.cleanup().await;
}

#[tokio::test]
async fn test_build_server_is_skipped() {
    let h = Harness::new().await;
    let mut server = server_with(ProxyType::Traefik);
    server.settings.is_build_server = true;
    let server = h.add_server(server).await;

    let outcome = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();

    assert!(matches!(outcome, StartOutcome::Skipped(SkipReason::BuildServer)));
    assert!(h.shell.commands().is_empty());
    h.cleanup().await;
}

#[tokio::test]
async fn test_swarm_start_deploys_one_stack() {
    let h = Harness::new().await;
    let mut server = server_with(ProxyType::Traefik);
    server.settings.is_swarm_manager = true;
    let server = h.add_server(server).await;

    let outcome = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    assert!(matches!(outcome, StartOutcome::Applied(_)));

    let commands = h.shell.commands_for(server.id);
    let deploys: Vec<&String> = commands
        .iter()
        .filter(|c| c.contains("docker stack deploy --detach"))
        .collect();
    assert_eq!(deploys.len(), 1);
    assert!(deploys[0].contains(&ProxyDefaults::default().base_path));
    assert!(!commands.iter().any(|c| c.contains("docker rm") || c.contains("stack rm")));
    h.cleanup().await;
}

#[tokio::test]
async fn test_single_host_start_sequence() {
    let h = Harness::new().await;
    let mut server = server_with(ProxyType::Caddy);
    server.networks = vec!["app-b".to_string(), "app-a".to_string()];
    let server = h.add_server(server).await;

    h.app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();

    let commands = h.shell.commands_for(server.id);
    let position = |pattern: &str| {
        commands
            .iter()
            .position(|c| c.contains(pattern))
            .unwrap_or_else(|| panic!("no command containing {pattern}"))
    };

    let pull = position("docker compose pull");
    let removal = position("docker rm -f");
    let up = position("docker compose up -d --wait");
    let connect_a = position("docker network connect app-a");
    let connect_b = position("docker network connect app-b");

    assert!(pull < removal);
    assert!(removal < up);
    assert!(up < connect_a);
    assert!(connect_a < connect_b);
    assert!(commands[removal].contains("|| true"));
    assert_eq!(
        commands.iter().filter(|c| c.contains("docker network connect")).count(),
        2
    );
    h.cleanup().await;
}

#[tokio::test]
async fn test_repeated_start_applies_once() {
    let h = Harness::new().await;
    h.shell.respond("docker inspect", "running healthy");
    let server = h.add_server(server_with(ProxyType::Traefik)).await;

    let first = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    h.wait_for_status(server.id, ProxyStatus::Running).await;
    let checksum = h.server(server.id).await.proxy.last_applied_settings;

    let second = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();

    assert!(matches!(first, StartOutcome::Applied(_)));
    assert!(matches!(second, StartOutcome::UpToDate));
    assert_eq!(h.server(server.id).await.proxy.last_applied_settings, checksum);
    assert_eq!(h.shell.count("docker compose up"), 1);

    let expected = render(&server, &ProxyDefaults::default()).unwrap().unwrap();
    assert_eq!(checksum, Some(expected.checksum));
    h.cleanup().await;
}

#[tokio::test]
async fn test_changed_settings_are_reapplied() {
    let h = Harness::new().await;
    h.shell.respond("docker inspect", "running healthy");
    let server = h.add_server(server_with(ProxyType::Traefik)).await;

    h.app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    h.wait_for_status(server.id, ProxyStatus::Running).await;
    let before = h.server(server.id).await.proxy.last_applied_settings;

    let mut changed = h.server(server.id).await;
    changed.proxy_settings.access_logs = true;
    h.app.servers.save(&changed).await.unwrap();
    assert!(h.app.controller.is_pending_apply(server.id).await.unwrap());

    let outcome = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();

    assert!(matches!(outcome, StartOutcome::Applied(_)));
    assert_ne!(h.server(server.id).await.proxy.last_applied_settings, before);
    assert!(!h.app.controller.is_pending_apply(server.id).await.unwrap());
    assert_eq!(h.shell.count("docker compose up"), 2);
    h.cleanup().await;
}

#[tokio::test]
async fn test_empty_configuration_is_fatal() {
    let h = Harness::new().await;
    let mut server = server_with(ProxyType::Traefik);
    server.proxy_settings.custom_config = Some("   ".to_string());
    let server = h.add_server(server).await;

    let result = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await;

    assert!(matches!(result, Err(HostError::ConfigNotSynced(id)) if id == server.id));
    assert!(h.shell.commands().is_empty());
    assert_eq!(h.server(server.id).await.proxy.status, ProxyStatus::Error);
    h.cleanup().await;
}

#[tokio::test]
async fn test_failed_start_marks_error() {
    let h = Harness::new().await;
    h.shell.fail_on("docker compose up");
    h.shell.respond("docker inspect", "running unhealthy");
    let server = h.add_server(server_with(ProxyType::Caddy)).await;

    let result = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await;

    assert!(matches!(result, Err(HostError::Remote { exit_code: 1, .. })));
    assert_eq!(h.server(server.id).await.proxy.status, ProxyStatus::Error);

    h.wait_for_commands("docker inspect", 1).await;
    assert_eq!(h.server(server.id).await.proxy.status, ProxyStatus::Error);
    assert_eq!(h.shell.count("docker network connect"), 0);
    h.cleanup().await;
}

#[tokio::test]
async fn test_unknown_server_is_not_found() {
    let h = Harness::new().await;
    let result = h
        .app
        .controller
        .start(Uuid::new_v4(), ExecutionMode::Sync, false)
        .await;

    assert!(matches!(result, Err(HostError::NotFound(_))));
    assert!(h.shell.commands().is_empty());
    h.cleanup().await;
}

#[tokio::test]
async fn test_async_start_reconciles_status() {
    let h = Harness::new().await;
    h.shell.respond("docker inspect", "running healthy");
    let server = h.add_server(server_with(ProxyType::Traefik)).await;

    let outcome = h
        .app
        .controller
        .start(server.id, ExecutionMode::Async, false)
        .await
        .unwrap();
    assert!(matches!(outcome, StartOutcome::Dispatched(_)));

    h.wait_for_status(server.id, ProxyStatus::Running).await;

    let server = h.server(server.id).await;
    assert_eq!(server.proxy.status, ProxyStatus::Running);
    assert_eq!(h.shell.count("docker compose up"), 1);
    h.cleanup().await;
}

#[tokio::test]
async fn test_stop_then_forced_start() {
    let h = Harness::new().await;
    h.shell.respond("docker inspect", "running healthy");
    let server = h.add_server(server_with(ProxyType::Caddy)).await;

    h.app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    h.wait_for_status(server.id, ProxyStatus::Running).await;
    h.app.controller.stop(server.id).await.unwrap();

    let stopped = h.server(server.id).await;
    assert!(stopped.proxy.force_stop);
    assert_eq!(stopped.proxy.status, ProxyStatus::Stopped);
    assert!(stopped.proxy.last_applied_settings.is_none());
    let removals = h
        .shell
        .commands()
        .iter()
        .filter(|c| c.starts_with("docker rm -f hostd-proxy"))
        .count();
    assert_eq!(removals, 1);

    let skipped = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    assert!(matches!(skipped, StartOutcome::Skipped(SkipReason::ForceStopped)));

    let forced = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, true)
        .await
        .unwrap();
    assert!(matches!(forced, StartOutcome::Applied(_)));
    assert_eq!(h.shell.count("docker compose up"), 2);
    h.cleanup().await;
}

fn swarm_server() -> Server {
    let mut server = server_with(ProxyType::Traefik);
    server.settings.is_swarm_manager = true;
    server
}

#[tokio::test]
async fn test_swarm_status_settles_to_running() {
    let h = Harness::with_options(|o| o.proxy.status_check_interval_ms = 20).await;
    h.shell.respond("docker service ls", "0/1");
    let server = h.add_server(swarm_server()).await;

    let first = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    assert!(matches!(first, StartOutcome::Applied(_)));

    h.wait_for_commands("docker service ls", 2).await;
    assert_eq!(h.server(server.id).await.proxy.status, ProxyStatus::Starting);

    h.shell.respond("docker service ls", "1/1");
    h.wait_for_status(server.id, ProxyStatus::Running).await;

    let second = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    assert!(matches!(second, StartOutcome::UpToDate));
    assert_eq!(h.shell.count("docker stack deploy"), 1);
    h.cleanup().await;
}

#[tokio::test]
async fn test_proxy_stuck_starting_is_reapplied() {
    let h = Harness::with_options(|o| {
        o.proxy.status_check_interval_ms = 10;
        o.proxy.status_check_attempts = 2;
    })
    .await;
    h.shell.respond("docker service ls", "0/1");
    let server = h.add_server(swarm_server()).await;

    h.app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    h.wait_for_commands("docker service ls", 2).await;
    assert_eq!(h.server(server.id).await.proxy.status, ProxyStatus::Starting);

    let second = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();
    assert!(matches!(second, StartOutcome::Applied(_)));
    assert_eq!(h.shell.count("docker stack deploy"), 2);
    h.cleanup().await;
}

#[tokio::test]
async fn test_stored_starting_status_is_not_applied() {
    let h = Harness::new().await;
    let mut server = server_with(ProxyType::Caddy);
    let config = render(&server, &ProxyDefaults::default()).unwrap().unwrap();
    server.proxy.status = ProxyStatus::Starting;
    server.proxy.last_applied_settings = Some(config.checksum);
    let server = h.add_server(server).await;

    let outcome = h
        .app
        .controller
        .start(server.id, ExecutionMode::Sync, false)
        .await
        .unwrap();

    assert!(matches!(outcome, StartOutcome::Applied(_)));
    assert_eq!(h.shell.count("docker compose up"), 1);
    h.cleanup().await;
}

#[tokio::test]
async fn test_status_check_does_not_block_other_events() {
    let mut h = Harness::new().await;
    let busy = h.add_server(server_with(ProxyType::Caddy)).await;
    let other = h.add_server(Server::new("edge-2", "10.0.0.6")).await;

    let guard = h.app.locks.acquire(busy.id).await;
    h.app.bus.publish(Event::ProxyStatusChanged { server_id: busy.id });
    h.app.bus.publish(Event::ServerValidated {
        server_uuid: other.id.to_string(),
    });

    h.wait_for(|e| matches!(e, Event::ServerValidated { .. })).await;
    let scheduled = h
        .app
        .pipeline
        .scheduled()
        .iter()
        .filter(|job| job.server_id == other.id)
        .count();
    assert_eq!(scheduled, 5);
    assert!(h.shell.commands_for(busy.id).is_empty());

    drop(guard);
    h.wait_for_commands("docker inspect", 1).await;
    assert_eq!(h.shell.commands_for(busy.id).len(), 1);
    h.cleanup().await;
}
