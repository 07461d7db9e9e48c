//! Change feed consumers.
//!
//! One task per watched kind polls its reflector-backed stream, turns raw
//! watch events into [`ChangeEvent`]s and hands them to the reconciler one at
//! a time. Polling is what keeps the caches current, so a feed never stops
//! on a watch error; kube-runtime's default backoff reconnects underneath.
//!
//! Shutdown is only observed between events: a handler that already started
//! runs to completion.

use crate::error::ControllerError;
use crate::event::{ChangeEvent, ResourceEvent, SnapshotTracker};
use crate::reconciler::Reconciler;
use cluster_client::FeedStream;
use crds::DanmEp;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Resource;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Generic feed loop shared by every watched kind.
async fn watch_resource<K, F>(
    mut stream: FeedStream<K>,
    reconciler: Arc<Reconciler>,
    mut shutdown: watch::Receiver<bool>,
    wrap: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + 'static,
    F: Fn(ResourceEvent<K>) -> ChangeEvent,
{
    info!("Starting {} watcher", resource_name);
    let mut tracker = SnapshotTracker::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    for change in tracker.observe(event) {
                        reconciler.handle(wrap(change)).await;
                    }
                }
                Some(Err(e)) => {
                    warn!("{} watch error (retrying): {}", resource_name, e);
                }
                None => {
                    return Err(ControllerError::Watch(format!("{} watch stream ended", resource_name)));
                }
            }
        }
    }

    debug!("{} watcher tracked {} objects at shutdown", resource_name, tracker.len());
    info!("Stopped {} watcher", resource_name);
    Ok(())
}

/// Watches Pods, Services and DanmEps on behalf of one reconciler.
#[derive(Clone)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    shutdown: watch::Receiver<bool>,
}

impl Watcher {
    /// Creates a new watcher. Sending `true` on the paired sender stops every feed.
    pub fn new(reconciler: Arc<Reconciler>, shutdown: watch::Receiver<bool>) -> Self {
        Self { reconciler, shutdown }
    }

    pub async fn watch_pods(&self, stream: FeedStream<Pod>) -> Result<(), ControllerError> {
        watch_resource(stream, self.reconciler.clone(), self.shutdown.clone(), ChangeEvent::Pod, "Pod").await
    }

    pub async fn watch_services(&self, stream: FeedStream<Service>) -> Result<(), ControllerError> {
        watch_resource(stream, self.reconciler.clone(), self.shutdown.clone(), ChangeEvent::Service, "Service").await
    }

    pub async fn watch_danm_eps(&self, stream: FeedStream<DanmEp>) -> Result<(), ControllerError> {
        watch_resource(stream, self.reconciler.clone(), self.shutdown.clone(), ChangeEvent::Attachment, "DanmEp").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::NETWORK_ANNOTATION;
    use crate::test_utils::*;
    use cluster_client::MockClusterClient;
    use kube_runtime::watcher::Event;

    #[tokio::test]
    async fn test_feed_dispatches_events_until_stream_ends() {
        let client = MockClusterClient::new();
        client.add_pod(test_pod("a", "default", true));
        client.add_danm_ep(test_danm_ep("ep-a", "default", "a", "internal", "10.0.0.5/24", "", &[("app", "web")]));
        let reconciler = Arc::new(create_test_reconciler(&client));
        let (_tx, rx) = watch::channel(false);
        let watcher = Watcher::new(reconciler, rx);

        let service = test_service("web", "default", "internal", &[("app", "web")]);
        let stream = futures::stream::iter(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(service.clone())),
            Ok(Event::InitDone),
        ])
        .boxed();

        let result = watcher.watch_services(stream).await;

        assert!(matches!(result, Err(ControllerError::Watch(_))));
        assert!(client.endpoints("default", "web").is_some());
    }

    #[tokio::test]
    async fn test_feed_tracks_previous_snapshot() {
        let client = MockClusterClient::new();
        client.add_pod(test_pod("a", "default", true));
        client.add_danm_ep(test_danm_ep("ep-a", "default", "a", "external", "10.0.1.5/24", "", &[("app", "web")]));
        let reconciler = Arc::new(create_test_reconciler(&client));
        let (_tx, rx) = watch::channel(false);
        let watcher = Watcher::new(reconciler, rx);

        let unmanaged = test_service("web", "default", "", &[("app", "web")]);
        let mut managed = unmanaged.clone();
        managed.metadata.resource_version = Some("2".to_string());
        managed
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(NETWORK_ANNOTATION.to_string(), "external".to_string());

        let stream = futures::stream::iter(vec![Ok(Event::Apply(unmanaged)), Ok(Event::Apply(managed))]).boxed();
        let _ = watcher.watch_services(stream).await;

        let eps = client.endpoints("default", "web").unwrap();
        assert_eq!(ips_of(&eps, crate::endpoints::Bucket::Ready), vec!["10.0.1.5"]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_feed() {
        let client = MockClusterClient::new();
        let reconciler = Arc::new(create_test_reconciler(&client));
        let (tx, rx) = watch::channel(false);
        let watcher = Watcher::new(reconciler, rx);

        tx.send(true).unwrap();
        let result = watcher.watch_pods(futures::stream::pending().boxed()).await;

        assert!(result.is_ok());
    }
}
