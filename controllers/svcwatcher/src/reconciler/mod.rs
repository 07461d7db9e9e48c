//! Change handlers.
//!
//! This module is organized by the kind that triggered the change:
//! - `attachment`: DanmEp added, updated, deleted
//! - `pod`: Pod updated (resourceVersion, readiness, labels)
//! - `service`: Service added and updated, startup reconciliation
//!
//! Handlers never hand errors back to the change feed. A failed handler is
//! logged once and left for the next event, watch re-list or restart to
//! repair.

pub mod attachment;
pub mod pod;
pub mod service;


use crate::endpoints::ResolvedAttachment;
use crate::error::ControllerError;
use crate::event::{ChangeEvent, ResourceEvent};
use crate::retry::RetryPolicy;
use crate::selector::{ServiceSelector, attachment_ips, attachment_matches_service};
use crate::writer::EndpointsWriter;
use cluster_client::ClusterClient;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Reconciles Endpoints objects against Pods, Services and DanmEps.
pub struct Reconciler {
    pub(crate) client: Arc<dyn ClusterClient>,
    pub(crate) writer: EndpointsWriter,
    pub(crate) retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClient>, retry: RetryPolicy) -> Self {
        Self {
            writer: EndpointsWriter::new(Arc::clone(&client)),
            client,
            retry,
        }
    }

    /// Dispatches one change event to its handler.
    pub async fn handle(&self, event: ChangeEvent) {
        let description = event.describe();
        debug!("Handling {}", description);

        let result = match event {
            ChangeEvent::Attachment(ResourceEvent::Added(ep)) => self.on_attachment_added(&ep).await,
            ChangeEvent::Attachment(ResourceEvent::Updated { old, new }) => {
                self.on_attachment_updated(&old, &new).await
            }
            ChangeEvent::Attachment(ResourceEvent::Deleted(ep)) => self.on_attachment_deleted(&ep).await,
            ChangeEvent::Pod(ResourceEvent::Updated { old, new }) => self.on_pod_updated(&old, &new).await,
            // Membership follows the attachment lifecycle
            ChangeEvent::Pod(ResourceEvent::Added(_) | ResourceEvent::Deleted(_)) => Ok(()),
            ChangeEvent::Service(ResourceEvent::Added(svc)) => self.on_service_added(&svc).await,
            ChangeEvent::Service(ResourceEvent::Updated { old, new }) => {
                self.on_service_updated(&old, &new).await
            }
            // Endpoints are never garbage collected here
            ChangeEvent::Service(ResourceEvent::Deleted(_)) => Ok(()),
        };

        if let Err(e) = result {
            match e {
                ControllerError::MalformedAnnotation(_) => warn!("Skipping {}: {}", description, e),
                _ => error!("Failed to handle {}: {}", description, e),
            }
        }
    }

    /// Matching attachments of `namespace` with their pods. Attachments whose
    /// pod is not cached are skipped.
    pub(crate) async fn resolve_attachments(
        &self,
        namespace: &str,
        selector: &ServiceSelector,
    ) -> Result<Vec<ResolvedAttachment>, ControllerError> {
        let mut resolved = Vec::new();
        for ep in self.client.list_danm_eps(namespace).await? {
            if !attachment_matches_service(&ep, selector) {
                continue;
            }
            match self.client.get_pod(namespace, &ep.spec.pod).await {
                Ok(pod) => resolved.push(ResolvedAttachment {
                    ips: attachment_ips(&ep),
                    pod,
                }),
                Err(e) if e.is_not_found() => {
                    warn!(
                        "Pod {}/{} of DanmEp {} not found, leaving it out",
                        namespace,
                        ep.spec.pod,
                        ep.metadata.name.as_deref().unwrap_or_default()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(resolved)
    }
}
