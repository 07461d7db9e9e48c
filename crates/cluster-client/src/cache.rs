//! Reflector caches and the watch streams that feed them.
//!
//! Each watched kind gets one `watcher` stream wrapped in a `reflector`, so the
//! cache is updated before the event reaches the controller. The controller
//! must keep polling the returned [`FeedStream`]s; a stream that is not polled
//! leaves its cache frozen.

use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use k8s_openapi::api::core::v1::{Pod, Service};
use crds::DanmEp;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::{WatchStreamExt, reflector, reflector::ObjectRef, reflector::Store, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Watch events for one resource kind, already applied to its cache.
pub type FeedStream<K> = BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>;

/// The change feeds the controller consumes, one per watched kind.
pub struct ChangeFeeds {
    pub pods: FeedStream<Pod>,
    pub services: FeedStream<Service>,
    pub danm_eps: FeedStream<DanmEp>,
}

impl Debug for ChangeFeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeeds").finish_non_exhaustive()
    }
}

/// Initial-sync flags of the three caches.
#[derive(Debug, Default)]
pub struct CacheSyncState {
    pods: AtomicBool,
    services: AtomicBool,
    danm_eps: AtomicBool,
}

impl CacheSyncState {
    /// True once every cache delivered its `InitDone` marker at least once.
    pub fn all_synced(&self) -> bool {
        self.pods.load(Ordering::Acquire)
            && self.services.load(Ordering::Acquire)
            && self.danm_eps.load(Ordering::Acquire)
    }
}

/// Read side of the reflector caches.
#[derive(Clone)]
pub struct ResourceCache {
    pub pods: Store<Pod>,
    pub services: Store<Service>,
    pub danm_eps: Store<DanmEp>,
    pub sync: Arc<CacheSyncState>,
}

impl Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    /// Creates the caches for the given APIs and returns the feeds driving them.
    pub fn new(pod_api: Api<Pod>, service_api: Api<Service>, danm_ep_api: Api<DanmEp>) -> (Self, ChangeFeeds) {
        let sync = Arc::new(CacheSyncState::default());

        let (pods, pod_feed) = reflect(pod_api, Arc::clone(&sync), |s| &s.pods);
        let (services, service_feed) = reflect(service_api, Arc::clone(&sync), |s| &s.services);
        let (danm_eps, danm_ep_feed) = reflect(danm_ep_api, Arc::clone(&sync), |s| &s.danm_eps);

        let cache = Self { pods, services, danm_eps, sync };
        let feeds = ChangeFeeds {
            pods: pod_feed,
            services: service_feed,
            danm_eps: danm_ep_feed,
        };
        (cache, feeds)
    }
}

/// Looks up one object by namespace and name.
pub fn get_cached<K>(store: &Store<K>, namespace: &str, name: &str) -> Option<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    store
        .get(&ObjectRef::new(name).within(namespace))
        .map(|object| (*object).clone())
}

/// Lists cached objects, optionally restricted to one namespace.
pub fn list_cached<K>(store: &Store<K>, namespace: Option<&str>) -> Vec<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    store
        .state()
        .into_iter()
        .filter(|object| namespace.is_none() || object.namespace().as_deref() == namespace)
        .map(|object| (*object).clone())
        .collect()
}

fn reflect<K, F>(api: Api<K>, sync: Arc<CacheSyncState>, flag: F) -> (Store<K>, FeedStream<K>)
where
    K: Resource + Clone + Debug + Send + Sync + DeserializeOwned + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    F: Fn(&CacheSyncState) -> &AtomicBool + Send + Sync + 'static,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher::Config::default()).default_backoff())
        .inspect_ok(move |event| {
            if matches!(event, watcher::Event::InitDone) {
                debug!("{} cache synced", kind);
                flag(&sync).store(true, Ordering::Release);
            }
        })
        .boxed();
    (reader, stream)
}
