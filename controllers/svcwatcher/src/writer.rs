//! Endpoints persistence.
//!
//! The writer performs single attempts. Callers wrap it in
//! [`crate::retry::RetryPolicy::run`] together with the read that produced
//! the record, so a conflict re-reads before writing again.

use crate::endpoints;
use crate::error::ControllerError;
use cluster_client::ClusterClient;
use k8s_openapi::api::core::v1::Endpoints;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Drops empty address lists, and the subset itself when both lists are empty.
pub fn normalize(record: &mut Endpoints) {
    if endpoints::is_empty(record) {
        record.subsets = None;
        return;
    }
    for subset in record.subsets.iter_mut().flatten() {
        if subset.addresses.as_ref().is_some_and(Vec::is_empty) {
            subset.addresses = None;
        }
        if subset.not_ready_addresses.as_ref().is_some_and(Vec::is_empty) {
            subset.not_ready_addresses = None;
        }
    }
}

/// Creates and updates Endpoints objects.
#[derive(Clone)]
pub struct EndpointsWriter {
    client: Arc<dyn ClusterClient>,
}

impl EndpointsWriter {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Persists `record`: an update carrying the resourceVersion of `existing`
    /// when the object exists, a create otherwise.
    pub async fn write(&self, mut record: Endpoints, existing: Option<&Endpoints>) -> Result<Endpoints, ControllerError> {
        normalize(&mut record);
        let name = record.name_any();
        let namespace = record.namespace().unwrap_or_default();

        let written = match existing {
            Some(current) => {
                record.metadata.resource_version = current.metadata.resource_version.clone();
                debug!("Updating Endpoints {}/{}", namespace, name);
                self.client.update_endpoints(&record).await?
            }
            None => {
                info!("Creating Endpoints {}/{}", namespace, name);
                self.client.create_endpoints(&record).await?
            }
        };
        Ok(written)
    }

    /// Updates every record in order, keeping the resourceVersion each one was
    /// read with. Stops at the first failure.
    pub async fn write_all(&self, records: Vec<Endpoints>) -> Result<usize, ControllerError> {
        let mut written = 0;
        for mut record in records {
            normalize(&mut record);
            debug!(
                "Updating Endpoints {}/{}",
                record.namespace().unwrap_or_default(),
                record.name_any()
            );
            self.client.update_endpoints(&record).await?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{ResolvedAttachment, build_endpoints};
    use crate::selector::AttachmentIps;
    use crate::test_utils::*;
    use cluster_client::MockClusterClient;
    use k8s_openapi::api::core::v1::EndpointSubset;

    #[test]
    fn test_normalize_collapses_empty_subset() {
        let service = test_service("web", "default", "internal", &[("app", "web")]);
        let mut record = build_endpoints(&service, &[]);
        record.subsets = Some(vec![EndpointSubset {
            addresses: Some(Vec::new()),
            not_ready_addresses: None,
            ports: None,
        }]);

        normalize(&mut record);
        assert!(record.subsets.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_then_updates() {
        let client = MockClusterClient::new();
        let writer = EndpointsWriter::new(Arc::new(client.clone()));
        let service = test_service("web", "default", "internal", &[("app", "web")]);
        let record = build_endpoints(&service, &[ResolvedAttachment {
            ips: AttachmentIps::new("10.0.0.5", ""),
            pod: test_pod("a", "default", true),
        }]);

        let created = writer.write(record.clone(), None).await.unwrap();
        let updated = writer.write(record, Some(&created)).await.unwrap();

        assert_ne!(created.metadata.resource_version, updated.metadata.resource_version);
        assert_eq!(client.endpoints_write_count(), 2);
    }

    #[tokio::test]
    async fn test_write_all_stops_at_first_failure() {
        let client = MockClusterClient::new();
        let writer = EndpointsWriter::new(Arc::new(client.clone()));
        let first = build_endpoints(&test_service("a", "default", "internal", &[("app", "a")]), &[]);
        let second = build_endpoints(&test_service("b", "default", "internal", &[("app", "b")]), &[]);
        client.add_endpoints(first.clone());
        client.add_endpoints(second.clone());
        let first = client.endpoints("default", "a").unwrap();
        let second = client.endpoints("default", "b").unwrap();

        client.fail_next_write("boom");
        let result = writer.write_all(vec![first, second]).await;

        assert!(result.is_err());
        assert_eq!(client.endpoints_write_count(), 0);
    }
}
