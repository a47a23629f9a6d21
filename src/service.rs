//! The service catalog's data model: what a user declares, and what the supervisor
//! last observed about it. Owned by the catalog; read (and status-updated) by the
//! supervisor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Broad category of a declared service. Used only to pick a default command when
/// none is declared (§4.1); it has no other effect on supervision.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Backend,
    Frontend,
    Worker,
    Database,
    Queue,
    Other,
}

/// The environment tag a service is declared under. Exported to the child process as
/// `ENVIRONMENT` when not already set by the env file or inline env map.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentTag {
    Development,
    Staging,
    Production,
}

impl fmt::Display for EnvironmentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentTag::Development => "development",
            EnvironmentTag::Staging => "staging",
            EnvironmentTag::Production => "production",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle status of a service as last observed by the supervisor. Mirrors the
/// state machine in §4.1; `Unknown` is reserved for definitions that have never been
/// started and have no persisted observation yet.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
    Unknown,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Error => "error",
            ServiceStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        ServiceStatus::Unknown
    }
}

/// A user-declared microservice. Owned by the catalog; the supervisor only ever reads
/// the declaration fields and writes the observation fields (`status`, `pid`,
/// `start_time`, `stop_time`, `last_error`, `logs`) through [`crate::catalog::CatalogRepository`].
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    pub service_type: ServiceType,
    /// Absolute path to the project directory. Must exist at start time.
    pub path: String,
    pub command: Option<String>,
    pub args: Option<String>,
    pub working_dir: Option<String>,
    pub port: Option<u16>,
    pub env_file: Option<String>,
    /// Inline environment variables, stored as a JSON object (`{"KEY": "value", ...}`).
    pub env_json: Option<String>,
    pub environment: Option<EnvironmentTag>,
    pub auto_restart: bool,
    pub max_restarts: Option<u32>,

    // Observation fields — written only by the supervisor via `UpdateStatus`/`UpdateLogs`.
    pub status: ServiceStatus,
    pub pid: u32,
    pub start_time: Option<u64>,
    pub stop_time: Option<u64>,
    pub last_error: String,
    pub logs: Vec<String>,
}

impl ServiceDefinition {
    /// A minimal, otherwise-default definition, for tests and the `supervisorctl` demo.
    pub fn new(id: impl Into<String>, service_type: ServiceType, path: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            service_type,
            path: path.into(),
            command: None,
            args: None,
            working_dir: None,
            port: None,
            env_file: None,
            env_json: None,
            environment: None,
            auto_restart: false,
            max_restarts: None,
            status: ServiceStatus::Unknown,
            pid: 0,
            start_time: None,
            stop_time: None,
            last_error: String::new(),
            logs: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_inline_env(mut self, env: &HashMap<String, String>) -> Self {
        self.env_json = serde_json::to_string(env).ok();
        self
    }
}

/// A snapshot of the fields the supervisor is allowed to mutate on a service's
/// persisted record. `None` fields are left untouched by the catalog implementation.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub start_time: Option<Option<u64>>,
    pub stop_time: Option<Option<u64>>,
    pub last_error: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: ServiceStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_start_time(mut self, start_time: u64) -> Self {
        self.start_time = Some(Some(start_time));
        self
    }

    pub fn with_stop_time(mut self, stop_time: u64) -> Self {
        self.stop_time = Some(Some(stop_time));
        self
    }

    pub fn with_last_error(mut self, err: impl Into<String>) -> Self {
        self.last_error = Some(err.into());
        self
    }

    pub fn clear_last_error(mut self) -> Self {
        self.last_error = Some(String::new());
        self
    }
}
