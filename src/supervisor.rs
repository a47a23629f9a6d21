//! The state core (§4.1): the authoritative in-memory map from service id to
//! [`ProcessHandle`], plus the five lifecycle operations and the read paths that
//! reconcile it against the catalog and the host OS.

use crate::catalog::CatalogRepository;
use crate::config::SupervisorConfig;
use crate::env_assembly::assemble_env;
use crate::errors::{Result, SupervisorError};
use crate::log_capturer;
use crate::logger::LogLevel;
use crate::log;
use crate::port_inventory::PortInventory;
use crate::prober;
use crate::process_handle::ProcessHandle;
use crate::service::{ServiceDefinition, ServiceStatus, ServiceType, StatusUpdate};
use crate::timestamp::current_timestamp;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::RwLock;

/// A running service and the definition last persisted about it, as returned by
/// [`Supervisor::running_set`].
pub struct RunningService {
    pub definition: ServiceDefinition,
    pub pid: u32,
    pub start_time: u64,
}

pub struct Supervisor {
    handles: RwLock<HashMap<String, Arc<ProcessHandle>>>,
    catalog: Arc<dyn CatalogRepository>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(catalog: Arc<dyn CatalogRepository>, config: SupervisorConfig) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            catalog,
            config,
        }
    }

    /// Starts the service, failing with [`SupervisorError::AlreadyRunning`] if a handle
    /// for `id` already exists.
    pub async fn start(&self, id: &str) -> Result<()> {
        let mut handles = self.handles.write().await;
        if handles.contains_key(id) {
            return Err(SupervisorError::AlreadyRunning(id.to_string()));
        }

        self.catalog
            .update_status(id, StatusUpdate::new(ServiceStatus::Starting))
            .await?;

        let definition = match self.catalog.load(id).await {
            Ok(def) => def,
            Err(e) => {
                self.catalog
                    .update_status(
                        id,
                        StatusUpdate::new(ServiceStatus::Error).with_last_error(e.to_string()),
                    )
                    .await?;
                return Err(e);
            }
        };

        let (program, args) = build_invocation(&definition, &self.config);
        let working_dir = definition
            .working_dir
            .clone()
            .unwrap_or_else(|| definition.path.clone());

        let env_file_contents = read_env_file(&definition).await;
        let env = assemble_env(&definition, env_file_contents.as_deref(), std::env::vars());

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&working_dir)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = SupervisorError::SpawnError(id.to_string(), e.to_string());
                self.catalog
                    .update_status(
                        id,
                        StatusUpdate::new(ServiceStatus::Error).with_last_error(err.to_string()),
                    )
                    .await?;
                return Err(err);
            }
        };

        let pid = match child.id() {
            Some(pid) if pid > 0 => pid,
            _ => {
                let _ = child.kill().await;
                let err = SupervisorError::SpawnError(
                    id.to_string(),
                    "spawned child reported no valid PID".to_string(),
                );
                self.catalog
                    .update_status(
                        id,
                        StatusUpdate::new(ServiceStatus::Error).with_last_error(err.to_string()),
                    )
                    .await?;
                return Err(err);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let start_time = current_timestamp();

        let handle = Arc::new(ProcessHandle::new(
            id,
            pid,
            child,
            start_time,
            self.config.ring_capacity,
            self.config.live_channel_capacity,
        ));

        if let Some(stdout) = stdout {
            tokio::spawn(log_capturer::capture(
                stdout,
                handle.clone(),
                self.catalog.clone(),
                false,
                self.config.log_persist_interval(),
            ));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(log_capturer::capture(
                stderr,
                handle.clone(),
                self.catalog.clone(),
                true,
                self.config.log_persist_interval(),
            ));
        }

        spawn_exit_watcher(id.to_string(), handle.clone(), self.catalog.clone());

        handles.insert(id.to_string(), handle);
        drop(handles);

        self.catalog
            .update_status(
                id,
                StatusUpdate::new(ServiceStatus::Running)
                    .with_pid(pid)
                    .with_start_time(start_time)
                    .clear_last_error(),
            )
            .await?;

        log!(LogLevel::Info, "Started service '{}' (pid {})", id, pid);
        Ok(())
    }

    /// Gracefully stops the service: sends `SIGTERM` immediately and waits up to
    /// [`SupervisorConfig::stop_grace`] for the process to exit on its own before
    /// escalating to `SIGKILL`. A no-op (returning `Ok`) if neither a handle nor a live
    /// OS process exists for `id`.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let handle = { self.handles.read().await.get(id).cloned() };
        let definition = self.catalog.load(id).await.ok();
        let persisted_pid = definition.as_ref().map(|d| d.pid).unwrap_or(0);

        let pid_live = persisted_pid > 0 && prober::is_pid_live(persisted_pid as i32);

        if handle.is_none() && !pid_live {
            self.catalog
                .update_status(
                    id,
                    StatusUpdate::new(ServiceStatus::Stopped)
                        .with_pid(0)
                        .with_stop_time(current_timestamp()),
                )
                .await?;
            return Ok(());
        }

        self.catalog
            .update_status(id, StatusUpdate::new(ServiceStatus::Stopping))
            .await?;

        if let Some(handle) = handle {
            handle.cancel_token().cancel();
            handle.signal_term()?;
            let exited = tokio::time::timeout(self.config.stop_grace(), handle.wait()).await;
            if exited.is_err() {
                log!(LogLevel::Warn, "Service '{}' did not exit gracefully; killing", id);
                handle.kill(self.config.stop_kill_wait()).await?;
            }
            handle.close_channel().await;
            self.handles.write().await.remove(id);
        } else if pid_live {
            crate::process_handle::kill_pgid_recursive(
                persisted_pid as i32,
                self.config.pid_kill_wait(),
            )?;
        }

        self.catalog
            .update_status(
                id,
                StatusUpdate::new(ServiceStatus::Stopped)
                    .with_pid(0)
                    .with_stop_time(current_timestamp()),
            )
            .await?;

        log!(LogLevel::Info, "Stopped service '{}'", id);
        Ok(())
    }

    /// Stops the service, waits [`SupervisorConfig::restart_delay`], then starts it again.
    pub async fn restart(&self, id: &str) -> Result<()> {
        self.stop(id).await?;
        tokio::time::sleep(self.config.restart_delay()).await;
        self.start(id).await
    }

    /// Unconditionally kills whatever is running under `id`, tracked or not.
    pub async fn force_kill(&self, id: &str) -> Result<()> {
        let handle = self.handles.write().await.remove(id);
        let persisted_pid = self.catalog.load(id).await.map(|d| d.pid).unwrap_or(0);

        if let Some(handle) = &handle {
            handle.cancel_token().cancel();
            handle.close_channel().await;
        }

        let pid = handle.as_ref().map(|h| h.pid()).unwrap_or(persisted_pid);
        if pid > 0 {
            crate::process_handle::kill_pgid_recursive(pid as i32, self.config.force_kill_wait())?;
        }

        self.catalog
            .update_status(
                id,
                StatusUpdate::new(ServiceStatus::Stopped)
                    .with_pid(0)
                    .with_stop_time(current_timestamp())
                    .with_last_error("Force killed"),
            )
            .await?;

        log!(LogLevel::Info, "Force-killed service '{}'", id);
        Ok(())
    }

    /// Reconciling read: loads the persisted record, probes liveness, and corrects any
    /// drift between the catalog and actual OS state before returning.
    pub async fn status(&self, id: &str) -> Result<ServiceDefinition> {
        let mut definition = self.catalog.load(id).await?;
        let handle = self.handles.read().await.get(id).cloned();
        let live = self.is_live(id, &definition, handle.as_ref()).await;

        if live {
            if matches!(definition.status, ServiceStatus::Stopped | ServiceStatus::Starting) {
                let mut update = StatusUpdate::new(ServiceStatus::Running);
                if definition.pid == 0 {
                    if let Some(port) = definition.port {
                        if let Some(pid) = PortInventory::find_pid_by_port(port).await {
                            update = update.with_pid(pid as u32);
                            definition.pid = pid as u32;
                        }
                    }
                }
                self.catalog.update_status(id, update).await?;
                definition.status = ServiceStatus::Running;
            }
        } else {
            if let Some(handle) = &handle {
                if handle.wait_is_finished().await {
                    handle.close_channel().await;
                    self.handles.write().await.remove(id);
                    self.catalog
                        .update_status(
                            id,
                            StatusUpdate::new(ServiceStatus::Stopped)
                                .with_pid(0)
                                .with_stop_time(current_timestamp()),
                        )
                        .await?;
                    definition.status = ServiceStatus::Stopped;
                    definition.pid = 0;
                }
            } else if matches!(
                definition.status,
                ServiceStatus::Running | ServiceStatus::Starting
            ) {
                self.catalog
                    .update_status(
                        id,
                        StatusUpdate::new(ServiceStatus::Stopped).with_pid(0),
                    )
                    .await?;
                definition.status = ServiceStatus::Stopped;
                definition.pid = 0;
            }
        }

        Ok(definition)
    }

    /// Ordered liveness check (§4.1 `IsLive`): first hit wins.
    pub async fn is_live(
        &self,
        id: &str,
        definition: &ServiceDefinition,
        handle: Option<&Arc<ProcessHandle>>,
    ) -> bool {
        if let Some(handle) = handle {
            if prober::is_pid_live(handle.pid() as i32) {
                return true;
            }
        }

        if let Some(port) = definition.port {
            if port > 0 && prober::is_port_listening(port).await {
                return true;
            }
        }

        if definition.pid > 0 {
            if prober::is_pid_live(definition.pid as i32) {
                return true;
            }
            if prober::has_child_processes(definition.pid as i32) {
                return true;
            }
        }

        log!(LogLevel::Trace, "Service '{}' is not live by any probe", id);
        false
    }

    /// A snapshot of every currently tracked (handle-present) service, with its
    /// persisted definition.
    pub async fn running_set(&self) -> Result<Vec<RunningService>> {
        let handles: Vec<(String, Arc<ProcessHandle>)> = self
            .handles
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut running = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            if let Ok(definition) = self.catalog.load(&id).await {
                running.push(RunningService {
                    definition,
                    pid: handle.pid(),
                    start_time: handle.start_time,
                });
            }
        }
        Ok(running)
    }

    /// Subscribes to live log lines for `id`. Returns `None` if there is no handle, or
    /// if the handle's process no longer responds to a liveness probe.
    pub async fn live_logs(&self, id: &str) -> Option<tokio::sync::broadcast::Receiver<String>> {
        let handle = self.handles.read().await.get(id).cloned()?;
        if !prober::is_pid_live(handle.pid() as i32) {
            return None;
        }
        handle.subscribe().await
    }

    /// A snapshot copy of the handle's ring; empty if no handle is tracked for `id`.
    pub async fn buffered_logs(&self, id: &str) -> Vec<String> {
        match self.handles.read().await.get(id) {
            Some(handle) => handle.snapshot().await,
            None => Vec::new(),
        }
    }

    pub async fn ports(&self) -> Vec<crate::port_inventory::PortRecord> {
        PortInventory::enumerate().await
    }

    /// Kills whatever process is bound to `port`.
    pub async fn kill_port(&self, port: u16) -> Result<()> {
        let Some(pid) = PortInventory::find_pid_by_port(port).await else {
            return Ok(());
        };
        crate::process_handle::kill_pgid_recursive(pid, self.config.force_kill_wait())
    }
}

fn build_invocation(definition: &ServiceDefinition, config: &SupervisorConfig) -> (String, Vec<String>) {
    let mut tokens: Vec<String> = match &definition.command {
        Some(command) if !command.trim().is_empty() => {
            command.split_whitespace().map(str::to_string).collect()
        }
        _ => match definition.service_type {
            ServiceType::Backend => config
                .default_backend_command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            ServiceType::Frontend => config
                .default_frontend_command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            _ => vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo 'no command configured for service {}'", definition.id),
            ],
        },
    };

    if let Some(args) = &definition.args {
        tokens.extend(args.split_whitespace().map(str::to_string));
    }

    let program = tokens.remove(0);
    (program, tokens)
}

async fn read_env_file(definition: &ServiceDefinition) -> Option<String> {
    let path = match &definition.env_file {
        Some(path) => path.clone(),
        None => format!("{}/.env", definition.path),
    };
    tokio::fs::read_to_string(&path).await.ok()
}

fn spawn_exit_watcher(
    id: String,
    handle: Arc<ProcessHandle>,
    catalog: Arc<dyn CatalogRepository>,
) {
    tokio::spawn(async move {
        let cancelled = handle.cancel_token();
        tokio::select! {
            _ = cancelled.cancelled() => return,
            result = handle.wait() => {
                let status_update = match result {
                    Ok(status) if status.success() => {
                        StatusUpdate::new(ServiceStatus::Stopped)
                            .with_pid(0)
                            .with_stop_time(current_timestamp())
                    }
                    Ok(status) => StatusUpdate::new(ServiceStatus::Error)
                        .with_pid(0)
                        .with_stop_time(current_timestamp())
                        .with_last_error(format!("process exited with {status}")),
                    Err(e) => StatusUpdate::new(ServiceStatus::Error)
                        .with_pid(0)
                        .with_stop_time(current_timestamp())
                        .with_last_error(e.to_string()),
                };

                handle.close_channel().await;
                if let Err(e) = catalog.update_status(&id, status_update).await {
                    log!(LogLevel::Warn, "Failed to persist exit status for '{}': {}", id, e);
                }
            }
        }
    });
}
