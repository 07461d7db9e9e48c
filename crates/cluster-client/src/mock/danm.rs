//! DanmEp operations for MockClusterClient

use super::{MockClusterClient, key_of};
use crate::error::ClusterError;
use crds::DanmEp;

pub async fn list_danm_eps(client: &MockClusterClient, namespace: &str) -> Result<Vec<DanmEp>, ClusterError> {
    let danm_eps = client.danm_eps.lock().unwrap();
    let mut results: Vec<DanmEp> = danm_eps
        .iter()
        .filter(|((ns, _), _)| ns == namespace)
        .map(|(_, ep)| ep.clone())
        .collect();
    results.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(results)
}

pub async fn update_danm_ep(client: &MockClusterClient, danm_ep: &DanmEp) -> Result<DanmEp, ClusterError> {
    let key = key_of(danm_ep);
    let mut danm_eps = client.danm_eps.lock().unwrap();
    let stored = danm_eps
        .get(&key)
        .ok_or_else(|| ClusterError::NotFound(format!("DanmEp {}/{}", key.0, key.1)))?;

    if danm_ep.metadata.resource_version.is_some()
        && danm_ep.metadata.resource_version != stored.metadata.resource_version
    {
        return Err(ClusterError::Conflict(format!(
            "DanmEp {}/{}: the object has been modified",
            key.0, key.1
        )));
    }

    let mut updated = danm_ep.clone();
    client.stamp(&mut updated);
    danm_eps.insert(key, updated.clone());
    *client.danm_ep_writes.lock().unwrap() += 1;
    Ok(updated)
}
