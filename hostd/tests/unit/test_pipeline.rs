//! Installation pipeline tests

use std::time::Duration;

use hostd::models::server::{ProxyType, Server};
use hostd::pipeline::state::{InstallState, InstallStep};
use hostd::pipeline::StepOutcome;
use hostd::proxy::config::render;
use hostd::storage::settings::ProxyDefaults;
use uuid::Uuid;

use crate::common::Harness;

#[tokio::test]
async fn test_unknown_server_schedules_nothing() {
    let h = Harness::new().await;

    let jobs = h
        .app
        .pipeline
        .on_server_validated(&Uuid::new_v4().to_string())
        .await;
    assert!(jobs.is_empty());

    let jobs = h.app.pipeline.on_server_validated("not-a-uuid").await;
    assert!(jobs.is_empty());
    assert!(h.app.pipeline.scheduled().is_empty());
    h.cleanup().await;
}

#[tokio::test]
async fn test_steps_scheduled_in_delay_order() {
    let h = Harness::new().await;
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    let jobs = h
        .app
        .pipeline
        .on_server_validated(&server.id.to_string())
        .await;

    let steps: Vec<InstallStep> = jobs.iter().map(|j| j.step).collect();
    assert_eq!(steps, InstallStep::ALL.to_vec());
    assert!(jobs.windows(2).all(|w| w[0].delay < w[1].delay));
    assert_eq!(jobs[0].step, InstallStep::InstallSecurityAgent);
    assert_eq!(jobs[0].delay, Duration::from_secs(30));
    assert_eq!(jobs[1].delay, Duration::from_secs(60));
    h.cleanup().await;
}

#[tokio::test]
async fn test_duplicate_event_is_deduplicated() {
    let h = Harness::new().await;
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    let first = h
        .app
        .pipeline
        .on_server_validated(&server.id.to_string())
        .await;
    let second = h
        .app
        .pipeline
        .on_server_validated(&server.id.to_string())
        .await;

    assert_eq!(first.len(), 5);
    assert!(second.is_empty());
    assert_eq!(h.app.pipeline.scheduled().len(), 5);
    h.cleanup().await;
}

#[tokio::test]
async fn test_completed_steps_are_not_scheduled() {
    let h = Harness::new().await;
    let mut server = Server::new("edge-1", "10.0.0.5");
    server.install_state = InstallState::TrafficLoggerInstalled;
    let server = h.add_server(server).await;

    let jobs = h
        .app
        .pipeline
        .on_server_validated(&server.id.to_string())
        .await;

    let steps: Vec<InstallStep> = jobs.iter().map(|j| j.step).collect();
    assert_eq!(
        steps,
        vec![
            InstallStep::ConfigureProxyLogging,
            InstallStep::DeployTrafficLogger,
            InstallStep::ValidateInstallation,
        ]
    );
    h.cleanup().await;
}

#[tokio::test]
async fn test_steps_run_at_most_once() {
    let h = Harness::new().await;
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    for (step, expected) in InstallStep::ALL.iter().zip([
        InstallState::SecurityAgentInstalled,
        InstallState::TrafficLoggerInstalled,
        InstallState::ProxyLoggingConfigured,
        InstallState::TrafficLoggerDeployed,
        InstallState::InstallationValidated,
    ]) {
        let outcome = h.app.pipeline.run_step(server.id, *step).await;
        assert_eq!(outcome, StepOutcome::Completed(expected));
    }
    let issued = h.shell.commands().len();
    assert!(issued > 0);

    for step in InstallStep::ALL {
        let outcome = h.app.pipeline.run_step(server.id, step).await;
        assert_eq!(outcome, StepOutcome::AlreadyDone);
    }
    assert_eq!(h.shell.commands().len(), issued);

    let server = h.server(server.id).await;
    assert!(server.crowdsec_installed());
    assert!(server.traffic_logger_installed());
    assert!(server.installation_validated());
    h.cleanup().await;
}

#[tokio::test]
async fn test_step_waits_for_predecessor() {
    let h = Harness::new().await;
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    let outcome = h
        .app
        .pipeline
        .run_step(server.id, InstallStep::InstallTrafficLogger)
        .await;

    assert_eq!(outcome, StepOutcome::Blocked(InstallState::Unvalidated));
    assert!(h.shell.commands().is_empty());
    h.cleanup().await;
}

#[tokio::test]
async fn test_failed_step_keeps_state() {
    let h = Harness::new().await;
    h.shell.fail_on("docker run -d --name hostd-crowdsec");
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    let outcome = h
        .app
        .pipeline
        .run_step(server.id, InstallStep::InstallSecurityAgent)
        .await;

    assert!(matches!(outcome, StepOutcome::Failed(_)));
    assert_eq!(h.server(server.id).await.install_state, InstallState::Unvalidated);
    h.cleanup().await;
}

#[tokio::test]
async fn test_proxy_logging_step_reapplies_proxy() {
    let h = Harness::new().await;
    h.shell.respond("docker inspect", "running healthy");
    let mut server = Server::new("edge-1", "10.0.0.5");
    server.proxy.proxy_type = ProxyType::Traefik;
    server.install_state = InstallState::TrafficLoggerInstalled;
    let server = h.add_server(server).await;

    let outcome = h
        .app
        .pipeline
        .run_step(server.id, InstallStep::ConfigureProxyLogging)
        .await;

    assert_eq!(
        outcome,
        StepOutcome::Completed(InstallState::ProxyLoggingConfigured)
    );
    let server = h.server(server.id).await;
    assert!(server.proxy_settings.access_logs);
    assert!(server.proxy.last_applied_settings.is_some());
    assert_eq!(h.shell.count("docker compose up"), 1);

    let applied = render(&server, &ProxyDefaults::default()).unwrap().unwrap();
    assert!(applied.content.contains("--accesslog=true"));
    assert_eq!(server.proxy.last_applied_settings, Some(applied.checksum));
    h.cleanup().await;
}

#[tokio::test]
async fn test_reinstall_resets_state() {
    let h = Harness::new().await;
    let mut server = Server::new("edge-1", "10.0.0.5");
    server.install_state = InstallState::InstallationValidated;
    let server = h.add_server(server).await;

    let jobs = h.app.pipeline.reinstall_all(server.id).await.unwrap();

    assert_eq!(jobs.len(), 5);
    assert_eq!(h.server(server.id).await.install_state, InstallState::Unvalidated);
    assert!(h.app.pipeline.reinstall_all(Uuid::new_v4()).await.is_err());
    h.cleanup().await;
}

#[tokio::test(start_paused = true)]
async fn test_validated_server_is_fully_installed() {
    let h = Harness::new().await;
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    h.app
        .pipeline
        .on_server_validated(&server.id.to_string())
        .await;
    tokio::time::sleep(Duration::from_secs(400)).await;

    assert_eq!(
        h.server(server.id).await.install_state,
        InstallState::InstallationValidated
    );
    assert!(h.app.pipeline.scheduled().is_empty());
    h.cleanup().await;
}

#[tokio::test(start_paused = true)]
async fn test_blocked_step_gives_up() {
    let h = Harness::with_options(|options| options.pipeline.max_attempts = 2).await;
    h.shell.fail_on("docker run -d --name hostd-crowdsec");
    let server = h.add_server(Server::new("edge-1", "10.0.0.5")).await;

    h.app
        .pipeline
        .on_server_validated(&server.id.to_string())
        .await;
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(h.server(server.id).await.install_state, InstallState::Unvalidated);
    assert_eq!(h.shell.count("docker pull allinurl/goaccess"), 0);
    assert!(h.app.pipeline.scheduled().is_empty());
    h.cleanup().await;
}
