//! The `CatalogRepository` contract (§6) — the one thing the supervisor core requires
//! from its environment. The real catalog store (an opaque key/value backend) is out
//! of scope for this crate; what follows is the trait boundary plus two concrete,
//! swappable implementations good enough to exercise the supervisor on their own.

pub mod file;
pub mod memory;

use crate::errors::{Result, SupervisorError};
use crate::service::{ServiceDefinition, StatusUpdate};
use async_trait::async_trait;

pub use file::FileCatalog;
pub use memory::InMemoryCatalog;

/// Read/write contract on service definitions and persisted status fields.
///
/// All mutations are atomic at the single-row (single service id) level. Implementations
/// may be called concurrently from multiple tasks — the supervisor does not serialize
/// its own access to the catalog beyond what each operation already needs.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Loads a service definition by id. Returns [`SupervisorError::NotFound`] if absent.
    async fn load(&self, id: &str) -> Result<ServiceDefinition>;

    /// Applies a partial status update to a service's persisted record.
    async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<()>;

    /// Replaces a service's persisted log snapshot. `lines` is already capped by the
    /// caller (the ring is never larger than `ring_capacity`).
    async fn update_logs(&self, id: &str, lines: &[String]) -> Result<()>;
}

fn not_found(id: &str) -> SupervisorError {
    SupervisorError::NotFound(id.to_string())
}
