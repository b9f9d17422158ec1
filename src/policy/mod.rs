//! Least-privilege policy synthesis
//!
//! Converts the adjacency into one Istio resource per calling workload:
//!
//! - **authz**: an `AuthorizationPolicy` selecting the caller and admitting
//!   the identities of every destination it was observed talking to
//! - **sidecar**: a `Sidecar` restricting the caller's egress to the hosts of
//!   the destinations it was observed talking to
//!
//! Callers without destinations get nothing. The adjacency does not carry
//! the caller's own namespace on its edges, so it is resolved per caller
//! through a [`NamespaceResolver`].

mod istio;
mod sidecar;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::graph::{Adjacency, DestinationMetadata};
use crate::query::{query_workloads, QueryApi, WorkloadQuery};
use crate::{Error, Result};

pub use istio::{
    AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule, AuthorizationSource,
    PolicyAction, SourceSpec, WorkloadSelector,
};
pub use sidecar::{
    egress_host, EgressListener, Sidecar, SidecarSpec, SidecarWorkloadSelector, CLUSTER_DOMAIN,
};

/// Pod label synthesized policies select workloads by
pub const APP_LABEL: &str = "app";

// =============================================================================
// Common Resource Types
// =============================================================================

/// Trait for resource types with a fixed API version and kind
pub trait HasApiResource {
    /// Full API version (e.g., "security.istio.io/v1beta1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "AuthorizationPolicy")
    const KIND: &'static str;
}

/// Kubernetes object metadata for synthesized resources
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Creation timestamp, never set on synthesized resources
    #[serde(default)]
    pub creation_timestamp: Option<String>,
    /// Resource name
    pub name: String,
    /// Resource namespace, omitted when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ObjectMeta {
    /// Create metadata for a named, namespaced resource
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            creation_timestamp: None,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Resource status; synthesized resources always carry an empty one
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceStatus {}

// =============================================================================
// Namespace Resolution
// =============================================================================

/// Resolves the namespace a calling workload runs in
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceResolver: Send + Sync {
    /// Namespace of `source`
    async fn source_namespace(&self, source: &str) -> Result<String>;
}

/// Resolves namespaces by re-running the workload query narrowed to one caller
///
/// Costs one query per caller.
pub struct QueryNamespaceResolver<'a, Q: QueryApi + ?Sized> {
    api: &'a Q,
    metric: String,
    namespace: Option<String>,
}

impl<'a, Q: QueryApi + ?Sized> QueryNamespaceResolver<'a, Q> {
    /// Resolver querying `metric` through `api`, within `namespace` if set
    pub fn new(api: &'a Q, metric: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            api,
            metric: metric.into(),
            namespace,
        }
    }
}

#[async_trait]
impl<Q: QueryApi + ?Sized> NamespaceResolver for QueryNamespaceResolver<'_, Q> {
    async fn source_namespace(&self, source: &str) -> Result<String> {
        let query = WorkloadQuery::new(self.metric.clone())
            .with_namespace(self.namespace.clone())
            .with_name_filter(Some(source.to_string()));
        let samples = query_workloads(self.api, &query).await?;

        // The name filter is a prefix match; only the exact caller counts
        let sample = samples
            .by_source
            .get(source)
            .and_then(|s| s.first())
            .ok_or_else(|| {
                Error::query(format!("no traffic samples found for source workload {}", source))
            })?;
        Ok(sample
            .label_or_empty(crate::LABEL_SOURCE_NAMESPACE)
            .to_string())
    }
}

/// Resolves namespaces from what the adjacency recorded while building
///
/// Costs no queries.
pub struct GraphNamespaceResolver<'a> {
    adjacency: &'a Adjacency,
}

impl<'a> GraphNamespaceResolver<'a> {
    /// Resolver backed by `adjacency`
    pub fn new(adjacency: &'a Adjacency) -> Self {
        Self { adjacency }
    }
}

#[async_trait]
impl NamespaceResolver for GraphNamespaceResolver<'_> {
    async fn source_namespace(&self, source: &str) -> Result<String> {
        self.adjacency
            .source_namespace(source)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::query(format!("no namespace recorded for source workload {}", source))
            })
    }
}

// =============================================================================
// Policy Synthesizer
// =============================================================================

/// Synthesizes per-caller policies from an adjacency
pub struct PolicySynthesizer<'a> {
    adjacency: &'a Adjacency,
    action: PolicyAction,
}

impl<'a> PolicySynthesizer<'a> {
    /// Create a synthesizer
    ///
    /// `audit` selects `AUDIT` over enforcing `ALLOW` for authorization policies.
    pub fn new(adjacency: &'a Adjacency, audit: bool) -> Self {
        Self {
            adjacency,
            action: PolicyAction::from_audit(audit),
        }
    }

    /// One AuthorizationPolicy per caller with destinations, in caller order
    ///
    /// Each policy admits the identity of every observed destination,
    /// repeats included.
    pub async fn authorization_policies<R: NamespaceResolver + ?Sized>(
        &self,
        resolver: &R,
    ) -> Result<Vec<AuthorizationPolicy>> {
        let mut policies = Vec::new();
        for (source, destinations) in self.callers() {
            let namespace = resolve_namespace(resolver, source).await?;
            debug!(source = %source, namespace = %namespace, "synthesizing authorization policy");
            policies.push(self.authorization_policy(source, &namespace, destinations));
        }
        info!(count = policies.len(), "synthesized authorization policies");
        Ok(policies)
    }

    /// One Sidecar per caller with destinations, in caller order
    pub async fn sidecars<R: NamespaceResolver + ?Sized>(
        &self,
        resolver: &R,
    ) -> Result<Vec<Sidecar>> {
        let mut sidecars = Vec::new();
        for (source, destinations) in self.callers() {
            let namespace = resolve_namespace(resolver, source).await?;
            debug!(source = %source, namespace = %namespace, "synthesizing sidecar");
            sidecars.push(self.sidecar(source, &namespace, destinations));
        }
        info!(count = sidecars.len(), "synthesized sidecars");
        Ok(sidecars)
    }

    /// AuthorizationPolicy for one caller
    pub fn authorization_policy(
        &self,
        source: &str,
        namespace: &str,
        destinations: &[DestinationMetadata],
    ) -> AuthorizationPolicy {
        let principals = destinations.iter().map(|d| d.identity.clone()).collect();
        AuthorizationPolicy::for_app(source, namespace, source, principals, self.action)
    }

    /// Sidecar for one caller
    pub fn sidecar(
        &self,
        source: &str,
        namespace: &str,
        destinations: &[DestinationMetadata],
    ) -> Sidecar {
        let hosts = destinations
            .iter()
            .map(|d| egress_host(&d.name, &d.namespace))
            .collect();
        Sidecar::egress_for_app(source, namespace, source, hosts)
    }

    fn callers(&self) -> impl Iterator<Item = (&'a str, &'a [DestinationMetadata])> {
        let adjacency: &'a Adjacency = self.adjacency;
        adjacency
            .iter()
            .filter(|(_, destinations)| !destinations.is_empty())
    }
}

async fn resolve_namespace<R: NamespaceResolver + ?Sized>(
    resolver: &R,
    source: &str,
) -> Result<String> {
    let namespace = resolver.source_namespace(source).await?;
    if namespace.is_empty() {
        warn!(source = %source, "caller has no namespace label, emitting it without one");
    }
    Ok(namespace)
}
