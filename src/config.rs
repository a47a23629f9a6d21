// src/config.rs

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Tunables for the supervisor core. Loaded the same way the rest of this family of
/// tools loads configuration: defaults, then an optional `Settings.toml` /
/// `Settings.<RUN_MODE>.toml`, then `APP_`-prefixed environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// How long `Stop` waits for a graceful exit before sending a kill signal.
    pub stop_grace_secs: u64,
    /// Additional wait after the kill signal before re-checking liveness.
    pub stop_kill_wait_secs: u64,
    /// Wait between kill attempts in `ForceKill`.
    pub force_kill_wait_millis: u64,
    /// Wait for a bare-PID (handle-less) stop before re-signalling.
    pub pid_kill_wait_secs: u64,
    /// Delay between Stop and Start in `Restart`.
    pub restart_delay_secs: u64,
    /// Maximum number of lines retained per service in the log ring.
    pub ring_capacity: usize,
    /// Maximum number of buffered-but-undelivered lines on the live channel.
    pub live_channel_capacity: usize,
    /// How often the log capturer persists a ring snapshot while the pipe is open.
    pub log_persist_interval_secs: u64,
    /// Default command used when a `backend`-typed service declares none.
    pub default_backend_command: String,
    /// Default command used when a `frontend`-typed service declares none.
    pub default_frontend_command: String,
}

impl SupervisorConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("stop_grace_secs", 10)?
            .set_default("stop_kill_wait_secs", 2)?
            .set_default("force_kill_wait_millis", 500)?
            .set_default("pid_kill_wait_secs", 1)?
            .set_default("restart_delay_secs", 2)?
            .set_default("ring_capacity", 1000)?
            .set_default("live_channel_capacity", 1000)?
            .set_default("log_persist_interval_secs", 2)?
            .set_default("default_backend_command", "go run main.go")?
            .set_default("default_frontend_command", "npm start")?;

        let builder = builder.add_source(File::with_name("Settings").required(false));
        let builder =
            builder.add_source(File::with_name(&format!("Settings.{}", run_mode)).required(false));
        let builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// A config with every default applied, for tests and the `supervisorctl` demo binary.
    pub fn dummy() -> Self {
        Self {
            stop_grace_secs: 10,
            stop_kill_wait_secs: 2,
            force_kill_wait_millis: 500,
            pid_kill_wait_secs: 1,
            restart_delay_secs: 2,
            ring_capacity: 1000,
            live_channel_capacity: 1000,
            log_persist_interval_secs: 2,
            default_backend_command: "go run main.go".to_string(),
            default_frontend_command: "npm start".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.stop_grace_secs == 0 {
            return Err("stop_grace_secs must be greater than 0".into());
        }
        if self.ring_capacity == 0 {
            return Err("ring_capacity must be greater than 0".into());
        }
        if self.live_channel_capacity == 0 {
            return Err("live_channel_capacity must be greater than 0".into());
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn stop_kill_wait(&self) -> Duration {
        Duration::from_secs(self.stop_kill_wait_secs)
    }

    pub fn force_kill_wait(&self) -> Duration {
        Duration::from_millis(self.force_kill_wait_millis)
    }

    pub fn pid_kill_wait(&self) -> Duration {
        Duration::from_secs(self.pid_kill_wait_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn log_persist_interval(&self) -> Duration {
        Duration::from_secs(self.log_persist_interval_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::dummy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_passes_validation() {
        assert!(SupervisorConfig::dummy().validate().is_ok());
    }

    #[test]
    fn zero_ring_capacity_is_rejected() {
        let mut cfg = SupervisorConfig::dummy();
        cfg.ring_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
