//! DanmEp CRD
//!
//! One `DanmEp` exists per network interface a pod owns on a DANM network.
//! It is created by the CNI attach lifecycle and deleted on detach; the
//! service watcher reads its addresses and keeps its labels in sync with the
//! owning pod.
//!
//! Field names follow the wire format already stored in clusters (PascalCase
//! with a few lowercase exceptions), so every field carries an explicit rename.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Address value meaning "this interface intentionally has no address".
pub const NONE_ALLOC_TYPE: &str = "none";

/// Address value meaning "the address will be assigned dynamically later".
pub const DYNAMIC_ALLOC_TYPE: &str = "dynamic";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "danm.k8s.io",
    version = "v1",
    kind = "DanmEp",
    plural = "danmeps",
    derive = "PartialEq",
    namespaced
)]
pub struct DanmEpSpec {
    /// Name of the network this interface is attached to
    #[serde(rename = "NetworkName")]
    pub network_name: String,

    /// Network type (ipvlan, sriov, ...)
    #[serde(rename = "NetworkType", default)]
    pub network_type: String,

    /// Endpoint identifier assigned by the CNI plugin
    #[serde(rename = "EndpointID", default)]
    pub endpoint_id: String,

    /// Interface details, including the allocated addresses
    #[serde(rename = "Interface")]
    pub iface: DanmEpIface,

    /// Node hosting the pod
    #[serde(rename = "Host", default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Name of the owning pod (same namespace as this object)
    #[serde(rename = "Pod")]
    pub pod: String,

    /// UID of the owning pod
    #[serde(rename = "PodUID", default, skip_serializing_if = "Option::is_none")]
    pub pod_uid: Option<String>,

    /// Container ID
    #[serde(rename = "CID", default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,

    /// Network namespace path of the pod sandbox
    #[serde(rename = "netns", default, skip_serializing_if = "Option::is_none")]
    pub netns: Option<String>,

    /// API kind of the referenced network (DanmNet, TenantNetwork, ClusterNetwork)
    #[serde(rename = "apiType", default)]
    pub api_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DanmEpIface {
    /// Interface name inside the pod
    #[serde(rename = "Name", default)]
    pub name: String,

    /// IPv4 address in CIDR notation, a sentinel, or empty
    #[serde(rename = "Address", default)]
    pub address: String,

    /// IPv6 address in CIDR notation, a sentinel, or empty
    #[serde(rename = "AddressIPv6", default)]
    pub address_ipv6: String,

    /// Deprecated, kept for wire compatibility
    #[serde(rename = "MacAddress", default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,

    /// IPv4 policy routes
    #[serde(rename = "proutes", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proutes: BTreeMap<String, String>,

    /// IPv6 policy routes
    #[serde(rename = "proutes6", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proutes6: BTreeMap<String, String>,

    /// Device ID for SR-IOV style attachments
    #[serde(rename = "DeviceID", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl DanmEpIface {
    /// IPv4 address without its prefix length. Sentinels are returned as-is.
    pub fn ipv4(&self) -> &str {
        strip_prefix_len(&self.address)
    }

    /// IPv6 address without its prefix length. Sentinels are returned as-is.
    pub fn ipv6(&self) -> &str {
        strip_prefix_len(&self.address_ipv6)
    }
}

/// Returns true for values that name a real address, i.e. neither empty nor
/// one of the allocation sentinels.
pub fn is_routable_address(address: &str) -> bool {
    !address.is_empty() && address != NONE_ALLOC_TYPE && address != DYNAMIC_ALLOC_TYPE
}

fn strip_prefix_len(address: &str) -> &str {
    address.split('/').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wire_format() {
        let raw = serde_json::json!({
            "apiVersion": "danm.k8s.io/v1",
            "kind": "DanmEp",
            "metadata": { "name": "pod-a-eth1", "namespace": "default" },
            "spec": {
                "NetworkName": "internal",
                "NetworkType": "ipvlan",
                "EndpointID": "abc",
                "Interface": {
                    "Name": "eth1",
                    "Address": "10.0.0.5/24",
                    "AddressIPv6": "dynamic",
                    "MacAddress": ""
                },
                "Pod": "pod-a",
                "PodUID": "uid-a",
                "apiType": "DanmNet"
            }
        });

        let ep: DanmEp = serde_json::from_value(raw).unwrap();
        assert_eq!(ep.spec.network_name, "internal");
        assert_eq!(ep.spec.pod, "pod-a");
        assert_eq!(ep.spec.pod_uid.as_deref(), Some("uid-a"));
        assert_eq!(ep.spec.iface.ipv4(), "10.0.0.5");
        assert_eq!(ep.spec.iface.ipv6(), "dynamic");
    }

    #[test]
    fn test_ipv6_prefix_is_stripped() {
        let iface = DanmEpIface {
            address_ipv6: "fd00::5/64".to_string(),
            ..Default::default()
        };
        assert_eq!(iface.ipv6(), "fd00::5");
        assert_eq!(iface.ipv4(), "");
    }

    #[test]
    fn test_is_routable_address() {
        assert!(is_routable_address("10.0.0.5"));
        assert!(is_routable_address("fd00::5"));
        assert!(!is_routable_address(""));
        assert!(!is_routable_address(NONE_ALLOC_TYPE));
        assert!(!is_routable_address(DYNAMIC_ALLOC_TYPE));
    }

    #[test]
    fn test_serialize_keeps_wire_names() {
        let spec = DanmEpSpec {
            network_name: "internal".to_string(),
            pod: "pod-a".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["NetworkName"], "internal");
        assert_eq!(value["Pod"], "pod-a");
        assert!(value.get("PodUID").is_none());
    }
}
