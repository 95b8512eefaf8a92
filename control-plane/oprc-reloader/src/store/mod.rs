//! Seam between the engines and the Kubernetes API.

mod kube_client;
mod memory;

pub use kube_client::KubeClient;
pub use memory::MemoryCluster;

use async_trait::async_trait;

use crate::error::Error;
use crate::source::{ConfigSource, SourceKey, SourceKind};
use crate::workload::Workload;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency failure on write.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Transport(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(m) => Error::PersistConflict(m),
            StoreError::Transport(m) => Error::Transport(m),
        }
    }
}

/// get/list/update primitives the engines need. Absence is `Ok(None)` so it
/// can never be confused with a transport failure.
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    async fn get_source(
        &self,
        key: &SourceKey,
    ) -> Result<Option<ConfigSource>, StoreError>;

    async fn list_sources(
        &self,
        namespace: &str,
        kind: SourceKind,
    ) -> Result<Vec<ConfigSource>, StoreError>;

    /// Persist `source.metadata.owner_references`, guarded by its
    /// resourceVersion.
    async fn update_source_owners(
        &self,
        source: &ConfigSource,
    ) -> Result<(), StoreError>;

    /// Replace the whole workload object, guarded by its resourceVersion.
    async fn replace_workload<K: Workload>(
        &self,
        obj: &K,
    ) -> Result<K, StoreError>;
}
