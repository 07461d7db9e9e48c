//! Pod and Service lookups for MockClusterClient

use super::MockClusterClient;
use crate::error::ClusterError;
use k8s_openapi::api::core::v1::{Pod, Service};

pub async fn get_pod(client: &MockClusterClient, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
    client
        .pods
        .lock()
        .unwrap()
        .get(&(namespace.to_string(), name.to_string()))
        .cloned()
        .ok_or_else(|| ClusterError::NotFound(format!("Pod {}/{}", namespace, name)))
}

pub async fn get_service(client: &MockClusterClient, namespace: &str, name: &str) -> Result<Service, ClusterError> {
    client
        .services
        .lock()
        .unwrap()
        .get(&(namespace.to_string(), name.to_string()))
        .cloned()
        .ok_or_else(|| ClusterError::NotFound(format!("Service {}/{}", namespace, name)))
}

pub async fn list_services(client: &MockClusterClient, namespace: Option<&str>) -> Result<Vec<Service>, ClusterError> {
    let services = client.services.lock().unwrap();
    let mut results: Vec<Service> = services
        .iter()
        .filter(|((ns, _), _)| namespace.is_none_or(|wanted| ns == wanted))
        .map(|(_, service)| service.clone())
        .collect();
    results.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(results)
}
