//! DanmEp handlers.

use super::Reconciler;
use crate::endpoints::{self, ResolvedAttachment, build_endpoints, remove_from_endpoints, repair_endpoints};
use crate::error::ControllerError;
use crate::selector::{
    AttachmentIps, attachment_ips, attachment_matches_service, parse_service_spec, tolerates_unready,
};
use crds::DanmEp;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

impl Reconciler {
    /// Publishes the addresses of a new attachment in every Service it matches.
    pub async fn on_attachment_added(&self, ep: &DanmEp) -> Result<(), ControllerError> {
        if !self.client.caches_synced() {
            debug!("Caches not synced yet, ignoring DanmEp {}", ep.name_any());
            return Ok(());
        }

        let namespace = ep.namespace().unwrap_or_default();
        let ips = attachment_ips(ep);

        for service in self.client.list_services(&namespace).await? {
            let selector = match parse_service_spec(service.annotations()) {
                Ok(selector) => selector,
                Err(e) => {
                    warn!("Service {}/{}: {}", namespace, service.name_any(), e);
                    continue;
                }
            };
            if !attachment_matches_service(ep, &selector) {
                continue;
            }

            let pod = match self.client.get_pod(&namespace, &ep.spec.pod).await {
                Ok(pod) => pod,
                Err(e) => {
                    warn!(
                        "Pod {}/{} of DanmEp {} unavailable, not adding it to Service {}: {}",
                        namespace,
                        ep.spec.pod,
                        ep.name_any(),
                        service.name_any(),
                        e
                    );
                    continue;
                }
            };

            let result = self
                .retry
                .run("Endpoints update", || self.add_attempt(&service, &ips, &pod).boxed())
                .await;
            if let Err(e) = result {
                error!(
                    "Failed to add DanmEp {}/{} to Endpoints {}: {}",
                    namespace,
                    ep.name_any(),
                    service.name_any(),
                    e
                );
            }
        }
        Ok(())
    }

    async fn add_attempt(&self, service: &Service, ips: &AttachmentIps, pod: &Pod) -> Result<(), ControllerError> {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let existing = self.client.get_endpoints(&namespace, &name).await?;

        if let Some(current) = existing.as_ref().filter(|eps| !endpoints::is_empty(eps)) {
            let mut repaired = current.clone();
            if repair_endpoints(&mut repaired, ips, pod, tolerates_unready(service.annotations())) {
                self.writer.write(repaired, Some(current)).await?;
            } else {
                debug!("Endpoints {}/{} already up to date", namespace, name);
            }
            return Ok(());
        }

        let fresh = build_endpoints(service, &[ResolvedAttachment {
            ips: ips.clone(),
            pod: pod.clone(),
        }]);
        self.writer.write(fresh, existing.as_ref()).await?;
        Ok(())
    }

    /// Replays an attachment change as removal of the old addresses followed
    /// by addition of the new ones.
    pub async fn on_attachment_updated(&self, old: &DanmEp, new: &DanmEp) -> Result<(), ControllerError> {
        if old.resource_version() == new.resource_version() {
            return Ok(());
        }
        if let Err(e) = self.on_attachment_deleted(old).await {
            error!("Failed to withdraw previous state of DanmEp {}: {}", old.name_any(), e);
        }
        self.on_attachment_added(new).await
    }

    /// Withdraws the addresses of a removed attachment from every Endpoints
    /// object of its namespace that selected it.
    pub async fn on_attachment_deleted(&self, ep: &DanmEp) -> Result<(), ControllerError> {
        let namespace = ep.namespace().unwrap_or_default();
        let ips = attachment_ips(ep);

        let written = self
            .retry
            .run("Endpoints cleanup", || self.remove_attempt(ep, &namespace, &ips).boxed())
            .await?;
        if written > 0 {
            info!(
                "Removed DanmEp {}/{} from {} Endpoints object(s)",
                namespace,
                ep.name_any(),
                written
            );
        }
        Ok(())
    }

    async fn remove_attempt(&self, ep: &DanmEp, namespace: &str, ips: &AttachmentIps) -> Result<usize, ControllerError> {
        let mut modified = Vec::new();

        for mut record in self.client.list_endpoints(namespace).await? {
            if record.subsets.is_none() {
                continue;
            }
            let selector = match parse_service_spec(record.annotations()) {
                Ok(selector) => selector,
                Err(e) => {
                    warn!("Endpoints {}/{}: {}", namespace, record.name_any(), e);
                    continue;
                }
            };
            if !selector.is_managed() || record.namespace().as_deref() != Some(namespace) {
                continue;
            }
            if !attachment_matches_service(ep, &selector) {
                continue;
            }
            if remove_from_endpoints(&mut record, ips) {
                modified.push(record);
            }
        }

        self.writer.write_all(modified).await
    }
}
