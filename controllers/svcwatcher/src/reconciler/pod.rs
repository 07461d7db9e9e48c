//! Pod handlers.
//!
//! A pod update runs exactly one of three passes, first match wins:
//! 1. nothing but the resourceVersion changed: refresh it in every entry
//! 2. readiness changed: move the pod's entries to the matching bucket
//! 3. labels changed: mirror the labels onto the pod's DanmEps
//!
//! Passes 1 and 2 only touch Endpoints objects carrying a DANM selector and
//! target network; other Endpoints belong to the stock endpoint controller.

use super::Reconciler;
use crate::endpoints::{Bucket, reassign_pod_bucket, refresh_pod_resource_version};
use crate::error::ControllerError;
use crate::selector::{parse_service_spec, pod_labels_changed, pod_ready, tolerates_unready};
use crds::DanmEp;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{Endpoints, Pod};
use kube::ResourceExt;
use tracing::{debug, error, info};

/// DanmEp is attached to `pod` (same name, namespace and UID).
fn owned_by(ep: &DanmEp, pod: &Pod) -> bool {
    ep.spec.pod == pod.name_any()
        && ep.namespace() == pod.namespace()
        && ep.spec.pod_uid == pod.metadata.uid
}

/// Endpoints object was written for a DANM-managed Service.
fn danm_managed(record: &Endpoints) -> bool {
    parse_service_spec(record.annotations()).is_ok_and(|selector| selector.is_managed())
}

impl Reconciler {
    /// Endpoints of DANM-managed Services in `namespace`, read from the API server.
    async fn managed_endpoints(&self, namespace: &str) -> Result<Vec<Endpoints>, ControllerError> {
        let mut records = self.client.list_endpoints(namespace).await?;
        records.retain(|record| record.subsets.is_some() && danm_managed(record));
        Ok(records)
    }

    pub async fn on_pod_updated(&self, old: &Pod, new: &Pod) -> Result<(), ControllerError> {
        if old.resource_version() == new.resource_version() || new.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }

        let old_ready = pod_ready(old);
        let new_ready = pod_ready(new);
        let labels_changed = pod_labels_changed(old, new);

        if old_ready == new_ready && !labels_changed {
            let written = self
                .retry
                .run("Pod resourceVersion refresh", || self.refresh_attempt(new).boxed())
                .await?;
            debug!("Refreshed Pod {} in {} Endpoints object(s)", new.name_any(), written);
            return Ok(());
        }

        if old_ready != new_ready {
            let written = self
                .retry
                .run("Pod readiness update", || self.readiness_attempt(new, new_ready).boxed())
                .await?;
            info!(
                "Pod {}/{} is now {}, updated {} Endpoints object(s)",
                new.namespace().unwrap_or_default(),
                new.name_any(),
                if new_ready { "ready" } else { "not ready" },
                written
            );
            return Ok(());
        }

        self.push_pod_labels(new).await
    }

    async fn refresh_attempt(&self, pod: &Pod) -> Result<usize, ControllerError> {
        let namespace = pod.namespace().unwrap_or_default();
        let mut modified = Vec::new();
        for mut record in self.managed_endpoints(&namespace).await? {
            if refresh_pod_resource_version(&mut record, pod) {
                modified.push(record);
            }
        }
        self.writer.write_all(modified).await
    }

    async fn readiness_attempt(&self, pod: &Pod, ready: bool) -> Result<usize, ControllerError> {
        let namespace = pod.namespace().unwrap_or_default();
        let mut modified = Vec::new();

        for mut record in self.managed_endpoints(&namespace).await? {
            let service = match self.client.get_service(&namespace, &record.name_any()).await {
                Ok(service) => service,
                Err(e) if e.is_not_found() => {
                    debug!("Service of Endpoints {}/{} not found, skipping", namespace, record.name_any());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let bucket = if ready || tolerates_unready(service.annotations()) {
                Bucket::Ready
            } else {
                Bucket::NotReady
            };
            if reassign_pod_bucket(&mut record, pod, bucket) {
                modified.push(record);
            }
        }

        self.writer.write_all(modified).await
    }

    async fn push_pod_labels(&self, pod: &Pod) -> Result<(), ControllerError> {
        let namespace = pod.namespace().unwrap_or_default();

        for ep in self.client.list_danm_eps(&namespace).await? {
            if !owned_by(&ep, pod) || ep.labels() == pod.labels() {
                continue;
            }
            let name = ep.name_any();
            let result = self
                .retry
                .run("DanmEp label update", || self.relabel_attempt(&namespace, &name, pod).boxed())
                .await;
            if let Err(e) = result {
                error!(
                    "Failed to copy labels of Pod {} to DanmEp {}/{}: {}",
                    pod.name_any(),
                    namespace,
                    name,
                    e
                );
            }
        }
        Ok(())
    }

    async fn relabel_attempt(&self, namespace: &str, name: &str, pod: &Pod) -> Result<(), ControllerError> {
        let current = self
            .client
            .list_danm_eps(namespace)
            .await?
            .into_iter()
            .find(|ep| ep.name_any() == name);
        let Some(mut ep) = current else {
            debug!("DanmEp {}/{} is gone, nothing to relabel", namespace, name);
            return Ok(());
        };

        ep.metadata.labels = Some(pod.labels().clone());
        self.client.update_danm_ep(&ep).await?;
        debug!("Copied labels of Pod {} to DanmEp {}/{}", pod.name_any(), namespace, name);
        Ok(())
    }
}
