//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test objects and setting up test scenarios.

#[cfg(test)]
use crate::endpoints::Bucket;
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crate::retry::RetryPolicy;
#[cfg(test)]
use crate::selector::{NETWORK_ANNOTATION, SELECTOR_ANNOTATION};
#[cfg(test)]
use crds::{DanmEp, DanmEpIface, DanmEpSpec};
#[cfg(test)]
use k8s_openapi::api::core::v1::{
    Endpoints, Pod, PodCondition, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use cluster_client::MockClusterClient;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Helper to create a test Pod with UID `uid-<name>`, resourceVersion `1`,
/// hostname `<name>` and node `node-1`
#[cfg(test)]
pub fn test_pod(name: &str, namespace: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(name.to_string()),
            node_name: Some("node-1".to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Helper to create a test Pod carrying labels
#[cfg(test)]
pub fn test_labelled_pod(name: &str, namespace: &str, ready: bool, labels: &[(&str, &str)]) -> Pod {
    let mut pod = test_pod(name, namespace, ready);
    pod.metadata.labels = Some(string_map(labels));
    pod
}

/// Helper to create a DANM-managed test Service with one `http` port
#[cfg(test)]
pub fn test_service(name: &str, namespace: &str, network: &str, selector: &[(&str, &str)]) -> Service {
    let mut annotations = BTreeMap::new();
    if !selector.is_empty() {
        let selector: BTreeMap<&str, &str> = selector.iter().copied().collect();
        annotations.insert(
            SELECTOR_ANNOTATION.to_string(),
            serde_json::to_string(&selector).unwrap(),
        );
    }
    if !network.is_empty() {
        annotations.insert(NETWORK_ANNOTATION.to_string(), network.to_string());
    }

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a test DanmEp owned by `pod` (UID `uid-<pod>`)
#[cfg(test)]
pub fn test_danm_ep(
    name: &str,
    namespace: &str,
    pod: &str,
    network: &str,
    address: &str,
    address_ipv6: &str,
    labels: &[(&str, &str)],
) -> DanmEp {
    DanmEp {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(string_map(labels)),
            ..Default::default()
        },
        spec: DanmEpSpec {
            network_name: network.to_string(),
            network_type: "ipvlan".to_string(),
            endpoint_id: format!("{}-id", name),
            iface: DanmEpIface {
                name: "eth1".to_string(),
                address: address.to_string(),
                address_ipv6: address_ipv6.to_string(),
                ..Default::default()
            },
            pod: pod.to_string(),
            pod_uid: Some(format!("uid-{}", pod)),
            api_type: "DanmNet".to_string(),
            ..Default::default()
        },
    }
}

/// IPs held by one bucket of the first subset, in stored order
#[cfg(test)]
pub fn ips_of(endpoints: &Endpoints, bucket: Bucket) -> Vec<String> {
    let Some(subset) = endpoints.subsets.as_ref().and_then(|s| s.first()) else {
        return Vec::new();
    };
    let list = match bucket {
        Bucket::Ready => &subset.addresses,
        Bucket::NotReady => &subset.not_ready_addresses,
    };
    list.iter().flatten().map(|a| a.ip.clone()).collect()
}

/// Helper to create a reconciler backed by `client`, retrying every millisecond
#[cfg(test)]
pub fn create_test_reconciler(client: &MockClusterClient) -> Reconciler {
    Reconciler::new(
        Arc::new(client.clone()),
        RetryPolicy::new(400, Duration::from_millis(1)),
    )
}
