//! Service handlers and startup reconciliation.

use super::Reconciler;
use crate::endpoints::build_endpoints;
use crate::error::ControllerError;
use crate::selector::{ServiceSelector, parse_service_spec, service_semantics_changed};
use futures::FutureExt;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Rebuilds the Endpoints object of a managed Service from every matching
    /// attachment.
    pub async fn on_service_added(&self, service: &Service) -> Result<(), ControllerError> {
        if !self.client.caches_synced() {
            debug!("Caches not synced yet, ignoring Service {}", service.name_any());
            return Ok(());
        }

        let selector = parse_service_spec(service.annotations())?;
        if !selector.is_managed() {
            debug!("Service {} has no DANM selector or network, skipping", service.name_any());
            return Ok(());
        }

        let attachments = self
            .retry
            .run("Endpoints rebuild", || self.rebuild_attempt(service, &selector).boxed())
            .await?;
        info!(
            "Endpoints {}/{} rebuilt from {} attachment(s)",
            service.namespace().unwrap_or_default(),
            service.name_any(),
            attachments
        );
        Ok(())
    }

    /// Matching attachments are re-read with the current Endpoints on every
    /// attempt.
    async fn rebuild_attempt(&self, service: &Service, selector: &ServiceSelector) -> Result<usize, ControllerError> {
        let namespace = service.namespace().unwrap_or_default();
        let attachments = self.resolve_attachments(&namespace, selector).await?;
        let existing = self.client.get_endpoints(&namespace, &service.name_any()).await?;
        let fresh = build_endpoints(service, &attachments);
        self.writer.write(fresh, existing.as_ref()).await?;
        Ok(attachments.len())
    }

    pub async fn on_service_updated(&self, old: &Service, new: &Service) -> Result<(), ControllerError> {
        if old.resource_version() == new.resource_version() || !service_semantics_changed(old, new) {
            return Ok(());
        }
        self.on_service_added(new).await
    }

    /// Runs every cached Service through [`Self::on_service_added`] once, so
    /// Services that existed before startup converge without a change event.
    ///
    /// Shutdown is checked between Services; the one in progress is finished.
    pub async fn startup_reconciliation(&self, shutdown: &watch::Receiver<bool>) -> Result<(), ControllerError> {
        let services = self.client.list_all_services().await?;
        let mut failed = 0;
        for (processed, service) in services.iter().enumerate() {
            if *shutdown.borrow() {
                info!(
                    "Shutdown requested, stopping startup reconciliation after {} of {} Service(s)",
                    processed,
                    services.len()
                );
                return Ok(());
            }
            if let Err(e) = self.on_service_added(service).await {
                failed += 1;
                warn!(
                    "Startup reconciliation of Service {}/{} failed: {}",
                    service.namespace().unwrap_or_default(),
                    service.name_any(),
                    e
                );
            }
        }
        info!(
            "Startup reconciliation processed {} Service(s), {} failed",
            services.len(),
            failed
        );
        Ok(())
    }
}
