//! ClusterClient trait for mocking
//!
//! This trait abstracts cluster access so the reconciliation engine can be
//! unit tested against [`crate::MockClusterClient`]. The kube-rs backed
//! [`crate::KubeClusterClient`] is used in production.

use crate::error::ClusterError;
use crds::DanmEp;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};

/// Reads and writes the service watcher needs.
///
/// Cache-backed reads may lag the API server. Writes use optimistic
/// concurrency: an update carrying a stale `metadata.resourceVersion` fails
/// with [`ClusterError::Conflict`].
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// True once every watched cache finished its initial list.
    fn caches_synced(&self) -> bool;

    // Cache-backed lookups
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError>;
    async fn list_all_services(&self) -> Result<Vec<Service>, ClusterError>;
    async fn list_danm_eps(&self, namespace: &str) -> Result<Vec<DanmEp>, ClusterError>;

    // Authoritative Endpoints reads
    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, ClusterError>;
    async fn list_endpoints(&self, namespace: &str) -> Result<Vec<Endpoints>, ClusterError>;

    // Writes
    async fn create_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints, ClusterError>;
    async fn update_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints, ClusterError>;
    async fn update_danm_ep(&self, danm_ep: &DanmEp) -> Result<DanmEp, ClusterError>;
}
