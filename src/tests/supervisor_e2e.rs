//! End-to-end scenarios exercising [`crate::supervisor::Supervisor`] against real child
//! processes (§8). Each test stands up its own `InMemoryCatalog` and `Supervisor`, the
//! same harness `supervisorctl` uses, so none of this depends on catalog durability.

use crate::catalog::{CatalogRepository, InMemoryCatalog};
use crate::config::SupervisorConfig;
use crate::service::{ServiceDefinition, ServiceStatus, ServiceType, StatusUpdate};
use crate::supervisor::Supervisor;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> SupervisorConfig {
    let mut cfg = SupervisorConfig::dummy();
    cfg.stop_grace_secs = 2;
    cfg.stop_kill_wait_secs = 1;
    cfg
}

#[tokio::test]
async fn orphan_by_port_is_detected_and_reconciled() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let def = ServiceDefinition::new("orphan", ServiceType::Backend, "/tmp")
        .with_command("sh -c \"nc -l 38273 & disown; sleep 1\"")
        .with_port(38273);
    catalog.upsert(def).await.unwrap();

    let supervisor = Supervisor::new(catalog.clone(), fast_config());
    supervisor.start("orphan").await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = supervisor.status("orphan").await.unwrap();
    assert_eq!(status.status, ServiceStatus::Running);
    assert!(status.pid > 0);

    supervisor.kill_port(38273).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = supervisor.status("orphan").await.unwrap();
    assert_eq!(status.status, ServiceStatus::Stopped);
    assert_eq!(status.pid, 0);
}

#[tokio::test]
async fn stop_timeout_falls_back_to_kill() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let def = ServiceDefinition::new("stubborn", ServiceType::Backend, "/tmp")
        .with_command("sh -c \"trap '' TERM; while true; do sleep 1; done\"");
    catalog.upsert(def).await.unwrap();

    let mut cfg = fast_config();
    cfg.stop_grace_secs = 1;
    cfg.stop_kill_wait_secs = 1;
    let supervisor = Supervisor::new(catalog.clone(), cfg);

    supervisor.start("stubborn").await.unwrap();
    let pid = catalog.load("stubborn").await.unwrap().pid;

    supervisor.stop("stubborn").await.unwrap();

    let loaded = catalog.load("stubborn").await.unwrap();
    assert_eq!(loaded.status, ServiceStatus::Stopped);
    assert_eq!(loaded.pid, 0);
    assert!(!crate::prober::is_pid_live(pid as i32));
}

#[tokio::test]
async fn force_kill_on_a_stale_nonexistent_pid_still_succeeds() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let mut def = ServiceDefinition::new("stale", ServiceType::Backend, "/tmp");
    def.pid = 999_999;
    catalog.upsert(def).await.unwrap();

    let supervisor = Supervisor::new(catalog.clone(), fast_config());
    supervisor.force_kill("stale").await.unwrap();

    let loaded = catalog.load("stale").await.unwrap();
    assert_eq!(loaded.status, ServiceStatus::Stopped);
    assert_eq!(loaded.pid, 0);
    assert_eq!(loaded.last_error, "Force killed");
}

#[tokio::test]
async fn spawn_failure_leaves_no_leaked_state_across_restarts() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let def = ServiceDefinition::new("broken", ServiceType::Backend, "/tmp")
        .with_command("/no/such/binary");
    catalog.upsert(def).await.unwrap();

    let supervisor = Supervisor::new(catalog.clone(), fast_config());
    assert!(supervisor.start("broken").await.is_err());
    assert!(supervisor.start("broken").await.is_err());

    let running = supervisor.running_set().await.unwrap();
    assert!(running.iter().all(|r| r.definition.id != "broken"));
}

#[tokio::test]
async fn status_reconciles_stale_running_row_with_no_handle_to_stopped() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let mut def = ServiceDefinition::new("ghost-running", ServiceType::Backend, "/tmp");
    def.status = ServiceStatus::Running;
    def.pid = 999_998;
    catalog.upsert(def).await.unwrap();

    let supervisor = Supervisor::new(catalog.clone(), fast_config());
    let status = supervisor.status("ghost-running").await.unwrap();

    assert_eq!(status.status, ServiceStatus::Stopped);
    assert_eq!(status.pid, 0);
}

#[tokio::test]
async fn buffered_logs_are_empty_without_a_handle() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog
        .upsert(ServiceDefinition::new("untracked", ServiceType::Backend, "/tmp"))
        .await
        .unwrap();

    let supervisor = Supervisor::new(catalog, fast_config());
    assert!(supervisor.buffered_logs("untracked").await.is_empty());
}

#[tokio::test]
async fn live_logs_returns_none_once_process_is_dead() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let def = ServiceDefinition::new("short-lived", ServiceType::Backend, "/tmp")
        .with_command("sh -c \"true\"");
    catalog.upsert(def).await.unwrap();

    let supervisor = Supervisor::new(catalog, fast_config());
    supervisor.start("short-lived").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(supervisor.live_logs("short-lived").await.is_none());
}

#[tokio::test]
async fn restart_stops_then_starts_with_a_fresh_pid() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let def = ServiceDefinition::new("cycled", ServiceType::Backend, "/tmp")
        .with_command("sh -c \"while true; do sleep 1; done\"");
    catalog.upsert(def).await.unwrap();

    let mut cfg = fast_config();
    cfg.restart_delay_secs = 0;
    let supervisor = Supervisor::new(catalog.clone(), cfg);

    supervisor.start("cycled").await.unwrap();
    let first_pid = catalog.load("cycled").await.unwrap().pid;

    supervisor.restart("cycled").await.unwrap();
    let second_pid = catalog.load("cycled").await.unwrap().pid;

    assert_ne!(first_pid, second_pid);
    assert!(second_pid > 0);

    supervisor.force_kill("cycled").await.unwrap();
}

#[tokio::test]
async fn stop_on_an_already_stopped_service_is_idempotent() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog
        .upsert(ServiceDefinition::new("never-started", ServiceType::Backend, "/tmp"))
        .await
        .unwrap();

    let supervisor = Supervisor::new(catalog.clone(), fast_config());
    supervisor.stop("never-started").await.unwrap();
    supervisor.stop("never-started").await.unwrap();

    let loaded = catalog.load("never-started").await.unwrap();
    assert_eq!(loaded.status, ServiceStatus::Stopped);
}

#[tokio::test]
async fn catalog_writes_made_outside_the_supervisor_are_reconciled_by_status() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog
        .upsert(ServiceDefinition::new("externally-edited", ServiceType::Backend, "/tmp"))
        .await
        .unwrap();
    catalog
        .update_status(
            "externally-edited",
            StatusUpdate::new(ServiceStatus::Running).with_pid(123_456),
        )
        .await
        .unwrap();

    let supervisor = Supervisor::new(catalog.clone(), fast_config());
    let status = supervisor.status("externally-edited").await.unwrap();

    assert_eq!(status.status, ServiceStatus::Stopped);
    assert_eq!(status.pid, 0);
}
