//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of [`ClusterClient`] that
//! behaves like the API server where it matters to the reconciliation engine:
//! every write bumps `metadata.resourceVersion`, and an update carrying a stale
//! version fails with [`ClusterError::Conflict`].
//!
//! The mock is organized into resource-specific modules:
//! - `workloads.rs` - Pod and Service lookups
//! - `endpoints.rs` - Endpoints reads and writes, conflict injection
//! - `danm.rs` - DanmEp lookups and label updates

mod workloads;
mod danm;
mod endpoints;

use crate::cluster_trait::ClusterClient;
use crate::error::ClusterError;
use crds::DanmEp;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::Resource;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Objects are keyed by `(namespace, name)`.
pub(crate) type ObjectKey = (String, String);

/// Mock ClusterClient for testing
///
/// Cloning shares the underlying storage, so a test can keep a handle for
/// assertions after handing a clone to the code under test.
#[derive(Clone, Debug)]
pub struct MockClusterClient {
    pub(crate) pods: Arc<Mutex<HashMap<ObjectKey, Pod>>>,
    pub(crate) services: Arc<Mutex<HashMap<ObjectKey, Service>>>,
    pub(crate) endpoints: Arc<Mutex<HashMap<ObjectKey, Endpoints>>>,
    pub(crate) danm_eps: Arc<Mutex<HashMap<ObjectKey, DanmEp>>>,
    pub(crate) synced: Arc<AtomicBool>,
    // Counter for generating resource versions
    pub(crate) next_version: Arc<Mutex<u64>>,
    // Failure injection
    pub(crate) injected_conflicts: Arc<Mutex<u32>>,
    pub(crate) injected_failures: Arc<Mutex<VecDeque<(u32, String)>>>,
    pub(crate) concurrent_updates: Arc<Mutex<VecDeque<Endpoints>>>,
    pub(crate) concurrent_danm_eps: Arc<Mutex<VecDeque<DanmEp>>>,
    // Write accounting
    pub(crate) endpoints_writes: Arc<Mutex<u64>>,
    pub(crate) danm_ep_writes: Arc<Mutex<u64>>,
}

impl Default for MockClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClusterClient {
    /// Create a new, empty mock whose caches report synced
    pub fn new() -> Self {
        Self {
            pods: Arc::new(Mutex::new(HashMap::new())),
            services: Arc::new(Mutex::new(HashMap::new())),
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            danm_eps: Arc::new(Mutex::new(HashMap::new())),
            synced: Arc::new(AtomicBool::new(true)),
            next_version: Arc::new(Mutex::new(1)),
            injected_conflicts: Arc::new(Mutex::new(0)),
            injected_failures: Arc::new(Mutex::new(VecDeque::new())),
            concurrent_updates: Arc::new(Mutex::new(VecDeque::new())),
            concurrent_danm_eps: Arc::new(Mutex::new(VecDeque::new())),
            endpoints_writes: Arc::new(Mutex::new(0)),
            danm_ep_writes: Arc::new(Mutex::new(0)),
        }
    }

    /// Set what `caches_synced()` reports
    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    /// Add a pod to the mock store (for test setup). Keeps a preset resourceVersion.
    pub fn add_pod(&self, mut pod: Pod) {
        self.stamp_if_unversioned(&mut pod);
        self.pods.lock().unwrap().insert(key_of(&pod), pod);
    }

    /// Add a service to the mock store (for test setup)
    pub fn add_service(&self, mut service: Service) {
        self.stamp_if_unversioned(&mut service);
        self.services.lock().unwrap().insert(key_of(&service), service);
    }

    /// Add an Endpoints object to the mock store (for test setup)
    pub fn add_endpoints(&self, mut endpoints: Endpoints) {
        self.stamp(&mut endpoints);
        self.endpoints.lock().unwrap().insert(key_of(&endpoints), endpoints);
    }

    /// Add a DanmEp to the mock store (for test setup)
    pub fn add_danm_ep(&self, mut danm_ep: DanmEp) {
        self.stamp(&mut danm_ep);
        self.danm_eps.lock().unwrap().insert(key_of(&danm_ep), danm_ep);
    }

    /// Remove a DanmEp from the mock store, as the CNI detach path would
    pub fn remove_danm_ep(&self, namespace: &str, name: &str) -> Option<DanmEp> {
        self.danm_eps.lock().unwrap().remove(&(namespace.to_string(), name.to_string()))
    }

    /// Current stored Endpoints object, if any
    pub fn endpoints(&self, namespace: &str, name: &str) -> Option<Endpoints> {
        self.endpoints.lock().unwrap().get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Current stored DanmEp, if any
    pub fn danm_ep(&self, namespace: &str, name: &str) -> Option<DanmEp> {
        self.danm_eps.lock().unwrap().get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Make the next `count` Endpoints writes fail with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        *self.injected_conflicts.lock().unwrap() += count;
    }

    /// Make the next Endpoints write fail with a non-retryable error
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.fail_write_after(0, message);
    }

    /// Let `successes` Endpoints writes through, then fail the next one with a
    /// non-retryable error
    pub fn fail_write_after(&self, successes: u32, message: impl Into<String>) {
        self.injected_failures.lock().unwrap().push_back((successes, message.into()));
    }

    /// Simulate another writer: the given object is stored (with a new
    /// resourceVersion) right before the next update of the same key is
    /// evaluated, so that update fails with a conflict.
    pub fn queue_concurrent_update(&self, endpoints: Endpoints) {
        self.concurrent_updates.lock().unwrap().push_back(endpoints);
    }

    /// Simulate an attachment appearing while a write is in flight: the DanmEp
    /// is stored right before the next Endpoints write is evaluated.
    pub fn queue_concurrent_danm_ep(&self, danm_ep: DanmEp) {
        self.concurrent_danm_eps.lock().unwrap().push_back(danm_ep);
    }

    /// Number of successful Endpoints creates and updates
    pub fn endpoints_write_count(&self) -> u64 {
        *self.endpoints_writes.lock().unwrap()
    }

    /// Number of successful DanmEp updates
    pub fn danm_ep_write_count(&self) -> u64 {
        *self.danm_ep_writes.lock().unwrap()
    }

    /// Generate next resource version
    pub(crate) fn next_version(&self) -> String {
        let mut version = self.next_version.lock().unwrap();
        let current = *version;
        *version += 1;
        current.to_string()
    }

    pub(crate) fn stamp<K: Resource>(&self, object: &mut K) {
        object.meta_mut().resource_version = Some(self.next_version());
    }

    fn stamp_if_unversioned<K: Resource>(&self, object: &mut K) {
        if object.meta().resource_version.is_none() {
            self.stamp(object);
        }
    }
}

pub(crate) fn key_of<K: Resource>(object: &K) -> ObjectKey {
    let meta = object.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    fn caches_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        workloads::get_pod(self, namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        workloads::get_service(self, namespace, name).await
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        workloads::list_services(self, Some(namespace)).await
    }

    async fn list_all_services(&self) -> Result<Vec<Service>, ClusterError> {
        workloads::list_services(self, None).await
    }

    async fn list_danm_eps(&self, namespace: &str) -> Result<Vec<DanmEp>, ClusterError> {
        danm::list_danm_eps(self, namespace).await
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, ClusterError> {
        endpoints::get_endpoints(self, namespace, name).await
    }

    async fn list_endpoints(&self, namespace: &str) -> Result<Vec<Endpoints>, ClusterError> {
        endpoints::list_endpoints(self, namespace).await
    }

    async fn create_endpoints(&self, eps: &Endpoints) -> Result<Endpoints, ClusterError> {
        endpoints::create_endpoints(self, eps).await
    }

    async fn update_endpoints(&self, eps: &Endpoints) -> Result<Endpoints, ClusterError> {
        endpoints::update_endpoints(self, eps).await
    }

    async fn update_danm_ep(&self, danm_ep: &DanmEp) -> Result<DanmEp, ClusterError> {
        danm::update_danm_ep(self, danm_ep).await
    }
}
