//! kube-rs backed cluster client
//!
//! Pods, Services and DanmEps come from the reflector caches in
//! [`crate::cache`]; Endpoints reads and all writes go to the API server.

use crate::cache::{ChangeFeeds, ResourceCache, get_cached, list_cached};
use crate::cluster_trait::ClusterClient;
use crate::error::ClusterError;
use crds::DanmEp;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::debug;

/// Production [`ClusterClient`] built on a kube [`Client`].
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    cache: ResourceCache,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Creates the client and the change feeds that populate its caches.
    ///
    /// # Arguments
    /// * `client` - Kubernetes client
    /// * `namespace` - Restrict watches to one namespace (`None` watches all)
    pub fn new(client: Client, namespace: Option<&str>) -> (Self, ChangeFeeds) {
        let (cache, feeds) = match namespace {
            Some(ns) => ResourceCache::new(
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            ),
            None => ResourceCache::new(
                Api::all(client.clone()),
                Api::all(client.clone()),
                Api::all(client.clone()),
            ),
        };
        (Self { client, cache }, feeds)
    }

    /// Waits until every cache has completed its initial list.
    ///
    /// The change feeds must be polled concurrently, otherwise this never
    /// returns.
    pub async fn wait_until_synced(&self) -> Result<(), ClusterError> {
        self.cache
            .pods
            .wait_until_ready()
            .await
            .map_err(|e| ClusterError::CacheUnavailable(format!("Pod cache: {}", e)))?;
        self.cache
            .services
            .wait_until_ready()
            .await
            .map_err(|e| ClusterError::CacheUnavailable(format!("Service cache: {}", e)))?;
        self.cache
            .danm_eps
            .wait_until_ready()
            .await
            .map_err(|e| ClusterError::CacheUnavailable(format!("DanmEp cache: {}", e)))?;
        Ok(())
    }

    fn endpoints_api(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Extracts `(namespace, name)` of an object about to be written.
fn write_target<K: Resource>(object: &K) -> Result<(String, String), ClusterError> {
    let meta = object.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ClusterError::InvalidRequest("object has no name".to_string()))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| ClusterError::InvalidRequest(format!("object {} has no namespace", name)))?;
    Ok((namespace, name))
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    fn caches_synced(&self) -> bool {
        self.cache.sync.all_synced()
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        get_cached(&self.cache.pods, namespace, name)
            .ok_or_else(|| ClusterError::NotFound(format!("Pod {}/{}", namespace, name)))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        get_cached(&self.cache.services, namespace, name)
            .ok_or_else(|| ClusterError::NotFound(format!("Service {}/{}", namespace, name)))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        Ok(list_cached(&self.cache.services, Some(namespace)))
    }

    async fn list_all_services(&self) -> Result<Vec<Service>, ClusterError> {
        Ok(list_cached(&self.cache.services, None))
    }

    async fn list_danm_eps(&self, namespace: &str) -> Result<Vec<DanmEp>, ClusterError> {
        Ok(list_cached(&self.cache.danm_eps, Some(namespace)))
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>, ClusterError> {
        Ok(self.endpoints_api(namespace).get_opt(name).await?)
    }

    async fn list_endpoints(&self, namespace: &str) -> Result<Vec<Endpoints>, ClusterError> {
        let list = self.endpoints_api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints, ClusterError> {
        let (namespace, name) = write_target(endpoints)?;
        debug!("Creating Endpoints {}/{}", namespace, name);
        Ok(self.endpoints_api(&namespace).create(&PostParams::default(), endpoints).await?)
    }

    async fn update_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints, ClusterError> {
        let (namespace, name) = write_target(endpoints)?;
        debug!(
            "Updating Endpoints {}/{} (resourceVersion {:?})",
            namespace, name, endpoints.resource_version()
        );
        Ok(self.endpoints_api(&namespace).replace(&name, &PostParams::default(), endpoints).await?)
    }

    async fn update_danm_ep(&self, danm_ep: &DanmEp) -> Result<DanmEp, ClusterError> {
        let (namespace, name) = write_target(danm_ep)?;
        debug!("Updating DanmEp {}/{}", namespace, name);
        let api: Api<DanmEp> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.replace(&name, &PostParams::default(), danm_ep).await?)
    }
}
