//! Typed change events.
//!
//! kube-rs watch streams report `Apply` and `Delete` without the prior state of
//! an object. The reconciler needs both snapshots to tell, for example, whether
//! a pod's readiness flipped, so every feed runs its events through a
//! [`SnapshotTracker`] that remembers the last version seen per object.

use crds::DanmEp;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};

/// Lifecycle event of one object.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K: Resource> ResourceEvent<K> {
    /// The most recent snapshot carried by the event.
    pub fn object(&self) -> &K {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => obj,
            ResourceEvent::Updated { new, .. } => new,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "added",
            ResourceEvent::Updated { .. } => "updated",
            ResourceEvent::Deleted(_) => "deleted",
        }
    }
}

/// Every event the reconciler handles.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Pod(ResourceEvent<Pod>),
    Service(ResourceEvent<Service>),
    Attachment(ResourceEvent<DanmEp>),
}

impl ChangeEvent {
    /// `kind namespace/name added|updated|deleted`, for logs.
    pub fn describe(&self) -> String {
        match self {
            ChangeEvent::Pod(e) => describe("Pod", e),
            ChangeEvent::Service(e) => describe("Service", e),
            ChangeEvent::Attachment(e) => describe("DanmEp", e),
        }
    }
}

fn describe<K: Resource>(kind: &str, event: &ResourceEvent<K>) -> String {
    let object = event.object();
    format!(
        "{} {}/{} {}",
        kind,
        object.namespace().unwrap_or_default(),
        object.name_any(),
        event.verb()
    )
}

type ObjectKey = (String, String);

fn key_of<K: Resource>(object: &K) -> ObjectKey {
    (object.namespace().unwrap_or_default(), object.name_any())
}

/// Converts raw watch events into [`ResourceEvent`]s.
///
/// A re-list (`Init` .. `InitDone`) replays the full collection; objects known
/// before the re-list that did not reappear are reported as deleted when it
/// completes.
#[derive(Debug)]
pub struct SnapshotTracker<K> {
    known: HashMap<ObjectKey, K>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl<K> Default for SnapshotTracker<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K: Resource + Clone> SnapshotTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently tracked
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Feeds one watch event and returns the resulting typed events, in order.
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(key_of(&obj));
                }
                vec![self.apply(obj)]
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let vanished: Vec<ObjectKey> = self
                    .known
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                vanished
                    .into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(ResourceEvent::Deleted)
                    .collect()
            }
            watcher::Event::Apply(obj) => vec![self.apply(obj)],
            watcher::Event::Delete(obj) => {
                self.known.remove(&key_of(&obj));
                vec![ResourceEvent::Deleted(obj)]
            }
        }
    }

    fn apply(&mut self, obj: K) -> ResourceEvent<K> {
        match self.known.insert(key_of(&obj), obj.clone()) {
            Some(old) => ResourceEvent::Updated { old, new: obj },
            None => ResourceEvent::Added(obj),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(name: &str, version: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some(version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_then_update_then_delete() {
        let mut tracker = SnapshotTracker::new();

        let events = tracker.observe(watcher::Event::Apply(service("a", "1")));
        assert_eq!(events, vec![ResourceEvent::Added(service("a", "1"))]);

        let events = tracker.observe(watcher::Event::Apply(service("a", "2")));
        assert_eq!(
            events,
            vec![ResourceEvent::Updated { old: service("a", "1"), new: service("a", "2") }]
        );

        let events = tracker.observe(watcher::Event::Delete(service("a", "2")));
        assert_eq!(events, vec![ResourceEvent::Deleted(service("a", "2"))]);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_initial_list_reports_additions() {
        let mut tracker = SnapshotTracker::new();
        assert!(tracker.observe(watcher::Event::Init).is_empty());
        assert_eq!(
            tracker.observe(watcher::Event::InitApply(service("a", "1"))),
            vec![ResourceEvent::Added(service("a", "1"))]
        );
        assert!(tracker.observe(watcher::Event::InitDone).is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_relist_reports_vanished_objects_as_deleted() {
        let mut tracker = SnapshotTracker::new();
        tracker.observe(watcher::Event::Apply(service("a", "1")));
        tracker.observe(watcher::Event::Apply(service("b", "1")));

        tracker.observe(watcher::Event::Init);
        let events = tracker.observe(watcher::Event::InitApply(service("a", "3")));
        assert_eq!(
            events,
            vec![ResourceEvent::Updated { old: service("a", "1"), new: service("a", "3") }]
        );

        let events = tracker.observe(watcher::Event::InitDone);
        assert_eq!(events, vec![ResourceEvent::Deleted(service("b", "1"))]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_describe() {
        let event = ChangeEvent::Service(ResourceEvent::Added(service("web", "1")));
        assert_eq!(event.describe(), "Service default/web added");
    }
}
