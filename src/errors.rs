//! Typed error surface for the supervisor core.
//!
//! Everything that can go wrong inside [`crate::supervisor::Supervisor`] is folded into
//! [`SupervisorError`]. Reconciliation paths (log capture, the exit watcher, `Status`)
//! never let these escape synchronously; they record `last_error` on the catalog instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no service definition for id '{0}'")]
    NotFound(String),

    #[error("service '{0}' is already running")]
    AlreadyRunning(String),

    #[error("failed to spawn service '{0}': {1}")]
    SpawnError(String, String),

    #[error("service '{0}' did not exit within the graceful window; force-killed")]
    StopTimeout(String),

    #[error("failed to signal pid {0}: {1}")]
    KillError(i32, String),

    #[error("no port-probing mechanism succeeded on this host: {0}")]
    PortProbeError(String),

    #[error("catalog repository error: {0}")]
    RepositoryError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        SupervisorError::RepositoryError(err.to_string())
    }
}

impl From<dusa_collection_utils::core::errors::ErrorArrayItem> for SupervisorError {
    fn from(err: dusa_collection_utils::core::errors::ErrorArrayItem) -> Self {
        SupervisorError::RepositoryError(err.to_string())
    }
}
