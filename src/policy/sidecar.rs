//! Istio Sidecar types
//!
//! A Sidecar with a single egress listener limits the hosts a workload's
//! proxy can reach to the listed `namespace/host` patterns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{HasApiResource, ObjectMeta, ResourceStatus};

/// Cluster-local DNS suffix appended to destination hosts
pub const CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// Istio Sidecar restricting outbound traffic
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    /// API version
    #[serde(default = "Sidecar::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Sidecar::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: SidecarSpec,
    /// Status (always empty for synthesized resources)
    #[serde(default)]
    pub status: ResourceStatus,
}

impl HasApiResource for Sidecar {
    const API_VERSION: &'static str = "networking.istio.io/v1beta1";
    const KIND: &'static str = "Sidecar";
}

impl Sidecar {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new Sidecar
    pub fn new(metadata: ObjectMeta, spec: SidecarSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
            status: ResourceStatus::default(),
        }
    }

    /// Sidecar for `app: <app>` workloads allowing egress only to `hosts`
    pub fn egress_for_app(
        name: impl Into<String>,
        namespace: impl Into<String>,
        app: impl Into<String>,
        hosts: Vec<String>,
    ) -> Self {
        Self::new(
            ObjectMeta::new(name, namespace),
            SidecarSpec {
                workload_selector: Some(SidecarWorkloadSelector {
                    labels: BTreeMap::from([(super::APP_LABEL.to_string(), app.into())]),
                }),
                egress: vec![EgressListener { hosts }],
            },
        )
    }

    /// Hosts of every egress listener, in order
    pub fn hosts(&self) -> Vec<&str> {
        self.spec
            .egress
            .iter()
            .flat_map(|e| e.hosts.iter().map(String::as_str))
            .collect()
    }
}

/// Sidecar spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// Workloads this Sidecar applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<SidecarWorkloadSelector>,
    /// Egress listeners
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<EgressListener>,
}

/// Sidecar workload selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SidecarWorkloadSelector {
    /// Labels a workload must carry
    pub labels: BTreeMap<String, String>,
}

/// Sidecar egress listener
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EgressListener {
    /// Reachable hosts in `namespace/dnsName` form
    pub hosts: Vec<String>,
}

/// Egress host for a destination workload, reachable from any namespace
///
/// `api` in `back` becomes `*/api.back.svc.cluster.local`. Without a
/// namespace only the bare workload name can be used.
pub fn egress_host(name: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        format!("*/{}", name)
    } else {
        format!("*/{}.{}.{}", name, namespace, CLUSTER_DOMAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn egress_host_is_wildcard_qualified() {
        assert_eq!(egress_host("api", "back"), "*/api.back.svc.cluster.local");
        assert_eq!(egress_host("api", ""), "*/api");
    }

    #[test]
    fn egress_for_app_has_one_listener() {
        let sidecar = Sidecar::egress_for_app(
            "web",
            "front",
            "web",
            vec![egress_host("api", "back"), egress_host("db", "data")],
        );
        assert_eq!(sidecar.kind, "Sidecar");
        assert_eq!(sidecar.api_version, "networking.istio.io/v1beta1");
        assert_eq!(sidecar.spec.egress.len(), 1);
        assert_eq!(
            sidecar.hosts(),
            vec![
                "*/api.back.svc.cluster.local",
                "*/db.data.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn serializes_workload_selector_labels() {
        let sidecar = Sidecar::egress_for_app("web", "front", "web", vec!["*/api".into()]);
        let json = serde_json::to_value(&sidecar).unwrap();
        assert_eq!(json["spec"]["workloadSelector"]["labels"]["app"], "web");
        assert_eq!(json["spec"]["egress"][0]["hosts"][0], "*/api");
        assert_eq!(json["metadata"]["namespace"], "front");
    }
}
