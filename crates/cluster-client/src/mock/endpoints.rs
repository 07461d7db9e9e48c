//! Endpoints operations for MockClusterClient
//!
//! Writes consult the failure-injection queues first, in this order:
//! queued DanmEp arrivals, queued concurrent updates (update only), injected
//! non-retryable failures, injected conflicts. Then the stored
//! resourceVersion is compared.

use super::{MockClusterClient, key_of};
use crate::error::ClusterError;
use k8s_openapi::api::core::v1::Endpoints;

pub async fn get_endpoints(client: &MockClusterClient, namespace: &str, name: &str) -> Result<Option<Endpoints>, ClusterError> {
    Ok(client
        .endpoints
        .lock()
        .unwrap()
        .get(&(namespace.to_string(), name.to_string()))
        .cloned())
}

pub async fn list_endpoints(client: &MockClusterClient, namespace: &str) -> Result<Vec<Endpoints>, ClusterError> {
    let endpoints = client.endpoints.lock().unwrap();
    let mut results: Vec<Endpoints> = endpoints
        .iter()
        .filter(|((ns, _), _)| ns == namespace)
        .map(|(_, eps)| eps.clone())
        .collect();
    results.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(results)
}

pub async fn create_endpoints(client: &MockClusterClient, eps: &Endpoints) -> Result<Endpoints, ClusterError> {
    let key = key_of(eps);
    apply_concurrent_danm_eps(client);
    check_injected_failures(client, &key)?;

    let mut endpoints = client.endpoints.lock().unwrap();
    if endpoints.contains_key(&key) {
        return Err(ClusterError::Conflict(format!(
            "Endpoints {}/{} already exists",
            key.0, key.1
        )));
    }

    let mut created = eps.clone();
    client.stamp(&mut created);
    endpoints.insert(key, created.clone());
    *client.endpoints_writes.lock().unwrap() += 1;
    Ok(created)
}

pub async fn update_endpoints(client: &MockClusterClient, eps: &Endpoints) -> Result<Endpoints, ClusterError> {
    let key = key_of(eps);
    apply_concurrent_danm_eps(client);
    apply_concurrent_update(client, &key);
    check_injected_failures(client, &key)?;

    let mut endpoints = client.endpoints.lock().unwrap();
    let stored = endpoints
        .get(&key)
        .ok_or_else(|| ClusterError::NotFound(format!("Endpoints {}/{}", key.0, key.1)))?;

    if eps.metadata.resource_version.is_some()
        && eps.metadata.resource_version != stored.metadata.resource_version
    {
        return Err(ClusterError::Conflict(format!(
            "Endpoints {}/{}: the object has been modified; please apply your changes to the latest version and try again",
            key.0, key.1
        )));
    }

    let mut updated = eps.clone();
    client.stamp(&mut updated);
    endpoints.insert(key, updated.clone());
    *client.endpoints_writes.lock().unwrap() += 1;
    Ok(updated)
}

/// Stores the first queued foreign update targeting `key`, if any.
fn apply_concurrent_update(client: &MockClusterClient, key: &(String, String)) {
    let foreign = {
        let mut queue = client.concurrent_updates.lock().unwrap();
        let position = queue.iter().position(|eps| &key_of(eps) == key);
        position.and_then(|index| queue.remove(index))
    };
    if let Some(mut foreign) = foreign {
        client.stamp(&mut foreign);
        client.endpoints.lock().unwrap().insert(key.clone(), foreign);
    }
}

/// Stores every queued DanmEp.
fn apply_concurrent_danm_eps(client: &MockClusterClient) {
    let arrivals: Vec<_> = client.concurrent_danm_eps.lock().unwrap().drain(..).collect();
    for mut danm_ep in arrivals {
        client.stamp(&mut danm_ep);
        client.danm_eps.lock().unwrap().insert(key_of(&danm_ep), danm_ep);
    }
}

fn check_injected_failures(client: &MockClusterClient, key: &(String, String)) -> Result<(), ClusterError> {
    {
        let mut failures = client.injected_failures.lock().unwrap();
        let fail_now = match failures.front_mut() {
            Some((successes, _)) if *successes > 0 => {
                *successes -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if fail_now {
            if let Some((_, message)) = failures.pop_front() {
                return Err(ClusterError::InvalidRequest(message));
            }
        }
    }

    let mut conflicts = client.injected_conflicts.lock().unwrap();
    if *conflicts > 0 {
        *conflicts -= 1;
        return Err(ClusterError::Conflict(format!(
            "Endpoints {}/{}: injected conflict",
            key.0, key.1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_trait::ClusterClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn endpoints(name: &str) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            subsets: None,
        }
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let client = MockClusterClient::new();
        let created = client.create_endpoints(&endpoints("svc")).await.unwrap();

        let fresh = client.update_endpoints(&created).await.unwrap();
        assert_ne!(fresh.metadata.resource_version, created.metadata.resource_version);

        let err = client.update_endpoints(&created).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(client.endpoints_write_count(), 2);
    }

    #[tokio::test]
    async fn test_create_existing_conflicts() {
        let client = MockClusterClient::new();
        client.create_endpoints(&endpoints("svc")).await.unwrap();
        let err = client.create_endpoints(&endpoints("svc")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let client = MockClusterClient::new();
        let err = client.update_endpoints(&endpoints("svc")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let client = MockClusterClient::new();
        client.inject_conflicts(1);
        assert!(client.create_endpoints(&endpoints("svc")).await.unwrap_err().is_conflict());
        assert!(client.create_endpoints(&endpoints("svc")).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_after_successful_writes() {
        let client = MockClusterClient::new();
        client.fail_write_after(1, "etcd unavailable");

        assert!(client.create_endpoints(&endpoints("first")).await.is_ok());
        let err = client.create_endpoints(&endpoints("second")).await.unwrap_err();
        assert!(!err.is_conflict());
        assert!(client.create_endpoints(&endpoints("second")).await.is_ok());
    }

    #[tokio::test]
    async fn test_queued_danm_ep_lands_on_next_write() {
        let client = MockClusterClient::new();
        let mut danm_ep = crds::DanmEp::new("ep-b", crds::DanmEpSpec::default());
        danm_ep.metadata.namespace = Some("default".to_string());
        client.queue_concurrent_danm_ep(danm_ep);
        assert!(client.danm_ep("default", "ep-b").is_none());

        client.create_endpoints(&endpoints("svc")).await.unwrap();
        assert!(client.danm_ep("default", "ep-b").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_update_invalidates_read() {
        let client = MockClusterClient::new();
        let read = client.create_endpoints(&endpoints("svc")).await.unwrap();

        client.queue_concurrent_update(endpoints("svc"));
        assert!(client.update_endpoints(&read).await.unwrap_err().is_conflict());

        let reread = client.get_endpoints("default", "svc").await.unwrap().unwrap();
        assert!(client.update_endpoints(&reread).await.is_ok());
    }
}
