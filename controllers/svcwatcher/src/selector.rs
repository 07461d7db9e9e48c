//! Service membership matching.
//!
//! A DANM-managed Service carries no `spec.selector`; it declares its members
//! through annotations instead:
//!
//! | annotation | content |
//! |------------|---------|
//! | `danm.k8s.io/selector` | JSON object of required labels |
//! | `danm.k8s.io/network` | DanmNet name(s) |
//! | `danm.k8s.io/tenantNetwork` | TenantNetwork name(s) |
//! | `danm.k8s.io/clusterNetwork` | ClusterNetwork name(s) |
//! | `service.alpha.kubernetes.io/tolerate-unready-endpoints` | `"true"` to publish unready pods as ready |
//!
//! A network annotation may list several names separated by commas. The same
//! annotations are copied onto the Endpoints object, so membership can be
//! re-evaluated from either.

use crate::error::ControllerError;
use crds::{DanmEp, is_routable_address};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};

pub const SELECTOR_ANNOTATION: &str = "danm.k8s.io/selector";
pub const NETWORK_ANNOTATION: &str = "danm.k8s.io/network";
pub const TENANT_NETWORK_ANNOTATION: &str = "danm.k8s.io/tenantNetwork";
pub const CLUSTER_NETWORK_ANNOTATION: &str = "danm.k8s.io/clusterNetwork";
pub const TOLERATE_UNREADY_ANNOTATION: &str = "service.alpha.kubernetes.io/tolerate-unready-endpoints";

const NETWORK_ANNOTATIONS: [&str; 3] = [
    NETWORK_ANNOTATION,
    TENANT_NETWORK_ANNOTATION,
    CLUSTER_NETWORK_ANNOTATION,
];

/// Membership declaration of a Service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSelector {
    /// Labels an attachment must carry, all with equal values
    pub selector: BTreeMap<String, String>,
    /// Networks whose attachments are eligible
    pub networks: BTreeSet<String>,
}

impl ServiceSelector {
    /// False for Services this controller leaves alone.
    pub fn is_managed(&self) -> bool {
        !self.selector.is_empty() && !self.networks.is_empty()
    }

    pub fn targets_network(&self, network: &str) -> bool {
        self.networks.contains(network)
    }
}

/// Parses the membership annotations.
///
/// A missing selector annotation yields an empty selector. A selector that is
/// not a JSON object of strings is rejected.
pub fn parse_service_spec(annotations: &BTreeMap<String, String>) -> Result<ServiceSelector, ControllerError> {
    let selector = match annotations.get(SELECTOR_ANNOTATION) {
        Some(raw) => serde_json::from_str::<BTreeMap<String, String>>(raw).map_err(|e| {
            ControllerError::MalformedAnnotation(format!("{}={:?}: {}", SELECTOR_ANNOTATION, raw, e))
        })?,
        None => BTreeMap::new(),
    };

    let networks = NETWORK_ANNOTATIONS
        .iter()
        .filter_map(|key| annotations.get(*key))
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    Ok(ServiceSelector { selector, networks })
}

/// True when every selector label is present with an equal value. An empty
/// selector matches nothing.
pub fn labels_match(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
}

/// Condition `Ready` is `True`.
pub fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

pub fn pod_labels_changed(old: &Pod, new: &Pod) -> bool {
    old.labels() != new.labels()
}

/// True when anything that influences Endpoints content differs: the
/// membership annotations, the tolerate-unready flag or the ports.
pub fn service_semantics_changed(old: &Service, new: &Service) -> bool {
    let old_annotations = old.annotations();
    let new_annotations = new.annotations();
    let annotation_changed = [SELECTOR_ANNOTATION, TOLERATE_UNREADY_ANNOTATION]
        .iter()
        .chain(NETWORK_ANNOTATIONS.iter())
        .any(|key| old_annotations.get(*key) != new_annotations.get(*key));

    let old_ports = old.spec.as_ref().and_then(|s| s.ports.as_ref());
    let new_ports = new.spec.as_ref().and_then(|s| s.ports.as_ref());

    annotation_changed || old_ports != new_ports
}

/// The attachment sits on a targeted network and carries the selected labels.
pub fn attachment_matches_service(record: &DanmEp, selector: &ServiceSelector) -> bool {
    selector.targets_network(&record.spec.network_name) && labels_match(record.labels(), &selector.selector)
}

pub fn tolerates_unready(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(TOLERATE_UNREADY_ANNOTATION)
        .is_some_and(|value| value == "true")
}

/// Addresses of one attachment, prefix length removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentIps {
    pub v4: String,
    pub v6: String,
}

impl AttachmentIps {
    pub fn new(v4: impl Into<String>, v6: impl Into<String>) -> Self {
        Self { v4: v4.into(), v6: v6.into() }
    }

    /// Addresses that may be published: not empty and not a sentinel.
    pub fn usable(&self) -> impl Iterator<Item = &str> {
        [self.v4.as_str(), self.v6.as_str()]
            .into_iter()
            .filter(|ip| is_routable_address(ip))
    }

    /// True when `ip` is one of the usable addresses.
    pub fn contains(&self, ip: &str) -> bool {
        self.usable().any(|own| own == ip)
    }
}

pub fn attachment_ips(record: &DanmEp) -> AttachmentIps {
    AttachmentIps::new(record.spec.iface.ipv4(), record.spec.iface.ipv6())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::{DYNAMIC_ALLOC_TYPE, NONE_ALLOC_TYPE};

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_service_spec() {
        let parsed = parse_service_spec(&annotations(&[
            (SELECTOR_ANNOTATION, r#"{"app":"web","tier":"front"}"#),
            (NETWORK_ANNOTATION, "internal"),
            (CLUSTER_NETWORK_ANNOTATION, "oam, sig ,"),
        ]))
        .unwrap();

        assert_eq!(parsed.selector.get("app").map(String::as_str), Some("web"));
        assert_eq!(parsed.selector.len(), 2);
        let networks: Vec<&str> = parsed.networks.iter().map(String::as_str).collect();
        assert_eq!(networks, vec!["internal", "oam", "sig"]);
        assert!(parsed.is_managed());
    }

    #[test]
    fn test_parse_missing_selector_is_unmanaged() {
        let parsed = parse_service_spec(&annotations(&[(NETWORK_ANNOTATION, "internal")])).unwrap();
        assert!(parsed.selector.is_empty());
        assert!(!parsed.is_managed());
    }

    #[test]
    fn test_parse_malformed_selector() {
        for raw in ["{not json", r#"{"app": 5}"#, r#"["app"]"#] {
            let result = parse_service_spec(&annotations(&[(SELECTOR_ANNOTATION, raw)]));
            assert!(
                matches!(result, Err(ControllerError::MalformedAnnotation(_))),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_labels_match() {
        let selector = annotations(&[("app", "web")]);
        assert!(labels_match(&annotations(&[("app", "web"), ("x", "y")]), &selector));
        assert!(!labels_match(&annotations(&[("app", "db")]), &selector));
        assert!(!labels_match(&annotations(&[]), &selector));
        assert!(!labels_match(&annotations(&[("app", "web")]), &BTreeMap::new()));
    }

    #[test]
    fn test_pod_ready() {
        assert!(pod_ready(&test_pod("p", "default", true)));
        assert!(!pod_ready(&test_pod("p", "default", false)));

        let mut pod = test_pod("p", "default", true);
        pod.status = None;
        assert!(!pod_ready(&pod));
    }

    #[test]
    fn test_service_semantics_changed() {
        let old = test_service("web", "default", "internal", &[("app", "web")]);

        let mut relabelled = old.clone();
        relabelled.metadata.labels = Some(annotations(&[("owner", "someone")]));
        assert!(!service_semantics_changed(&old, &relabelled));

        let mut retargeted = old.clone();
        retargeted.annotations_mut().insert(NETWORK_ANNOTATION.to_string(), "external".to_string());
        assert!(service_semantics_changed(&old, &retargeted));

        let mut tolerant = old.clone();
        tolerant.annotations_mut().insert(TOLERATE_UNREADY_ANNOTATION.to_string(), "true".to_string());
        assert!(service_semantics_changed(&old, &tolerant));

        let mut reported = old.clone();
        if let Some(ports) = reported.spec.as_mut().and_then(|s| s.ports.as_mut()) {
            ports[0].port = 8443;
        }
        assert!(service_semantics_changed(&old, &reported));
    }

    #[test]
    fn test_attachment_matches_service() {
        let selector = ServiceSelector {
            selector: annotations(&[("app", "web")]),
            networks: ["internal".to_string()].into_iter().collect(),
        };
        let record = test_danm_ep("ep1", "default", "pod1", "internal", "10.0.0.5/24", "", &[("app", "web")]);
        assert!(attachment_matches_service(&record, &selector));

        let other_net = test_danm_ep("ep2", "default", "pod1", "external", "10.0.0.5/24", "", &[("app", "web")]);
        assert!(!attachment_matches_service(&other_net, &selector));

        let other_labels = test_danm_ep("ep3", "default", "pod1", "internal", "10.0.0.5/24", "", &[("app", "db")]);
        assert!(!attachment_matches_service(&other_labels, &selector));
    }

    #[test]
    fn test_tolerates_unready() {
        assert!(tolerates_unready(&annotations(&[(TOLERATE_UNREADY_ANNOTATION, "true")])));
        assert!(!tolerates_unready(&annotations(&[(TOLERATE_UNREADY_ANNOTATION, "false")])));
        assert!(!tolerates_unready(&annotations(&[])));
    }

    #[test]
    fn test_attachment_ips_skip_sentinels() {
        let record = test_danm_ep("ep1", "default", "pod1", "internal", "10.0.0.5/24", "fd00::5/64", &[]);
        let ips = attachment_ips(&record);
        assert_eq!(ips, AttachmentIps::new("10.0.0.5", "fd00::5"));
        assert_eq!(ips.usable().collect::<Vec<_>>(), vec!["10.0.0.5", "fd00::5"]);

        let ips = AttachmentIps::new(NONE_ALLOC_TYPE, DYNAMIC_ALLOC_TYPE);
        assert_eq!(ips.usable().count(), 0);
        assert!(!ips.contains(NONE_ALLOC_TYPE));
    }
}
