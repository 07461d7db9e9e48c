//! Endpoints construction and repair.
//!
//! Everything here is pure: functions take the current objects and return or
//! mutate an Endpoints value, the reconciler decides what to persist.
//!
//! The Endpoints objects maintained by this controller hold a single subset
//! with a ready and a not-ready address list. The following holds after every
//! function in this module:
//! - an IP appears at most once across both lists
//! - sentinel addresses (`none`, `dynamic`) are never stored

use crate::selector::{AttachmentIps, pod_ready, tolerates_unready};
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectReference, Pod, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::HashSet;

/// Address list an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Ready,
    NotReady,
}

/// An attachment whose owning pod has been resolved.
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub ips: AttachmentIps,
    pub pod: Pod,
}

/// Ready when the pod is ready or the Service publishes unready pods anyway.
pub fn partition_pod(pod: &Pod, tolerates_unready: bool) -> Bucket {
    if tolerates_unready || pod_ready(pod) {
        Bucket::Ready
    } else {
        Bucket::NotReady
    }
}

/// Reference from an address entry back to its pod.
pub fn pod_target_ref(pod: &Pod) -> ObjectReference {
    ObjectReference {
        kind: Some("Pod".to_string()),
        name: pod.metadata.name.clone(),
        namespace: pod.metadata.namespace.clone(),
        uid: pod.metadata.uid.clone(),
        resource_version: pod.metadata.resource_version.clone(),
        ..Default::default()
    }
}

/// True when `address` was published for `pod` (same name, namespace and UID).
pub fn belongs_to_pod(address: &EndpointAddress, pod: &Pod) -> bool {
    address.target_ref.as_ref().is_some_and(|target| {
        target.name == pod.metadata.name
            && target.namespace == pod.metadata.namespace
            && target.uid == pod.metadata.uid
    })
}

fn subset_contains(subset: &EndpointSubset, ip: &str) -> bool {
    subset
        .addresses
        .iter()
        .chain(subset.not_ready_addresses.iter())
        .flatten()
        .any(|address| address.ip == ip)
}

/// Appends an entry for every usable address of `ips` that is neither in
/// `existing` (either list) nor already in `list`.
pub fn append_addresses(
    ips: &AttachmentIps,
    pod: &Pod,
    existing: Option<&EndpointSubset>,
    target_ref: &ObjectReference,
    list: &mut Vec<EndpointAddress>,
) {
    let hostname = pod.spec.as_ref().and_then(|s| s.hostname.clone());
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());

    for ip in ips.usable() {
        if existing.is_some_and(|subset| subset_contains(subset, ip)) {
            continue;
        }
        if list.iter().any(|address| address.ip == ip) {
            continue;
        }
        list.push(EndpointAddress {
            ip: ip.to_string(),
            hostname: hostname.clone(),
            node_name: node_name.clone(),
            target_ref: Some(target_ref.clone()),
        });
    }
}

/// Drops every entry carrying one of `ips`. Returns true if anything was dropped.
pub fn remove_addresses(ips: &AttachmentIps, list: &mut Vec<EndpointAddress>) -> bool {
    let before = list.len();
    list.retain(|address| !ips.contains(&address.ip));
    list.len() != before
}

/// Removes `ips` from both lists of every subset.
pub fn remove_from_endpoints(endpoints: &mut Endpoints, ips: &AttachmentIps) -> bool {
    let mut changed = false;
    for subset in endpoints.subsets.iter_mut().flatten() {
        for list in [&mut subset.addresses, &mut subset.not_ready_addresses] {
            if let Some(addresses) = list.as_mut() {
                changed |= remove_addresses(ips, addresses);
            }
        }
    }
    changed
}

/// Adds the addresses of one attachment to an existing Endpoints object.
///
/// Addresses already present in either list are left where they are, so
/// repeating the call is a no-op. Returns true if anything was added.
pub fn repair_endpoints(endpoints: &mut Endpoints, ips: &AttachmentIps, pod: &Pod, force_ready: bool) -> bool {
    let subsets = endpoints.subsets.get_or_insert_with(Vec::new);
    if subsets.is_empty() {
        subsets.push(EndpointSubset::default());
    }
    let subset = &mut subsets[0];

    if ips.usable().all(|ip| subset_contains(subset, ip)) {
        return false;
    }

    let mut additions = Vec::new();
    append_addresses(ips, pod, Some(&*subset), &pod_target_ref(pod), &mut additions);

    let list = match partition_pod(pod, force_ready) {
        Bucket::Ready => &mut subset.addresses,
        Bucket::NotReady => &mut subset.not_ready_addresses,
    };
    list.get_or_insert_with(Vec::new).extend(additions);
    true
}

/// Builds the full Endpoints object of `service` from scratch.
///
/// The object mirrors the Service's name, namespace and annotations, and its
/// ports. Without usable addresses the subset is omitted.
pub fn build_endpoints(service: &Service, attachments: &[ResolvedAttachment]) -> Endpoints {
    let tolerates = tolerates_unready(service.annotations());
    let mut ready = Vec::new();
    let mut not_ready = Vec::new();

    for attachment in attachments {
        let target_ref = pod_target_ref(&attachment.pod);
        let (list, other) = match partition_pod(&attachment.pod, tolerates) {
            Bucket::Ready => (&mut ready, &not_ready),
            Bucket::NotReady => (&mut not_ready, &ready),
        };
        let seen = EndpointSubset {
            addresses: Some(other.clone()),
            ..Default::default()
        };
        append_addresses(&attachment.ips, &attachment.pod, Some(&seen), &target_ref, list);
    }

    let mut endpoints = Endpoints {
        metadata: ObjectMeta {
            name: service.metadata.name.clone(),
            namespace: service.metadata.namespace.clone(),
            annotations: service.metadata.annotations.clone(),
            ..Default::default()
        },
        subsets: None,
    };

    if !ready.is_empty() || !not_ready.is_empty() {
        endpoints.subsets = Some(vec![EndpointSubset {
            addresses: non_empty(ready),
            not_ready_addresses: non_empty(not_ready),
            ports: service_ports(service),
        }]);
    }
    endpoints
}

fn service_ports(service: &Service) -> Option<Vec<EndpointPort>> {
    let ports = service.spec.as_ref()?.ports.as_ref()?;
    Some(
        ports
            .iter()
            .map(|port| EndpointPort {
                name: port.name.clone(),
                port: port.port,
                protocol: port.protocol.clone(),
                app_protocol: port.app_protocol.clone(),
            })
            .collect(),
    )
}

fn non_empty(list: Vec<EndpointAddress>) -> Option<Vec<EndpointAddress>> {
    if list.is_empty() { None } else { Some(list) }
}

/// Copies the pod's current resourceVersion into every entry that refers to
/// it. Returns true if any entry changed.
pub fn refresh_pod_resource_version(endpoints: &mut Endpoints, pod: &Pod) -> bool {
    let mut changed = false;
    for subset in endpoints.subsets.iter_mut().flatten() {
        for address in subset
            .addresses
            .iter_mut()
            .chain(subset.not_ready_addresses.iter_mut())
            .flatten()
        {
            if !belongs_to_pod(address, pod) {
                continue;
            }
            if let Some(target) = address.target_ref.as_mut() {
                if target.resource_version != pod.metadata.resource_version {
                    target.resource_version = pod.metadata.resource_version.clone();
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Moves every entry of `pod` into `bucket`, keeping order and dropping
/// duplicate IPs. Returns true if anything moved.
pub fn reassign_pod_bucket(endpoints: &mut Endpoints, pod: &Pod, bucket: Bucket) -> bool {
    let mut changed = false;
    for subset in endpoints.subsets.iter_mut().flatten() {
        let (source, target) = match bucket {
            Bucket::Ready => (&mut subset.not_ready_addresses, &mut subset.addresses),
            Bucket::NotReady => (&mut subset.addresses, &mut subset.not_ready_addresses),
        };
        let Some(source_list) = source.as_mut() else {
            continue;
        };

        let (moving, staying): (Vec<_>, Vec<_>) = source_list
            .drain(..)
            .partition(|address| belongs_to_pod(address, pod));
        *source_list = staying;
        if moving.is_empty() {
            continue;
        }

        let target_list = target.get_or_insert_with(Vec::new);
        let mut seen: HashSet<String> = target_list.iter().map(|a| a.ip.clone()).collect();
        for address in moving {
            if seen.insert(address.ip.clone()) {
                target_list.push(address);
            }
        }
        changed = true;

        if source_list.is_empty() {
            *source = None;
        }
    }
    changed
}

/// True when no subset holds any address.
pub fn is_empty(endpoints: &Endpoints) -> bool {
    endpoints.subsets.iter().flatten().all(|subset| {
        subset.addresses.as_ref().is_none_or(Vec::is_empty)
            && subset.not_ready_addresses.as_ref().is_none_or(Vec::is_empty)
    })
}
