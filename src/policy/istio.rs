//! Istio AuthorizationPolicy types
//!
//! Only the subset needed for identity allow-lists: a workload selector,
//! one rule with `from.source.principals`, and the action.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{HasApiResource, ObjectMeta, ResourceStatus};

/// Istio AuthorizationPolicy allowing inbound traffic from a set of identities
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    /// API version
    #[serde(default = "AuthorizationPolicy::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AuthorizationPolicy::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: AuthorizationPolicySpec,
    /// Status (always empty for synthesized policies)
    #[serde(default)]
    pub status: ResourceStatus,
}

impl HasApiResource for AuthorizationPolicy {
    const API_VERSION: &'static str = "security.istio.io/v1beta1";
    const KIND: &'static str = "AuthorizationPolicy";
}

impl AuthorizationPolicy {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new AuthorizationPolicy
    pub fn new(metadata: ObjectMeta, spec: AuthorizationPolicySpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
            status: ResourceStatus::default(),
        }
    }

    /// Policy selecting `app: <app>` workloads and admitting `principals`
    pub fn for_app(
        name: impl Into<String>,
        namespace: impl Into<String>,
        app: impl Into<String>,
        principals: Vec<String>,
        action: PolicyAction,
    ) -> Self {
        Self::new(
            ObjectMeta::new(name, namespace),
            AuthorizationPolicySpec {
                selector: Some(WorkloadSelector::app(app)),
                rules: vec![AuthorizationRule {
                    from: vec![AuthorizationSource {
                        source: SourceSpec { principals },
                    }],
                }],
                action: action.as_str().to_string(),
            },
        )
    }

    /// Principals admitted by the first rule
    pub fn principals(&self) -> &[String] {
        self.spec
            .rules
            .first()
            .and_then(|r| r.from.first())
            .map(|f| f.source.principals.as_slice())
            .unwrap_or(&[])
    }
}

/// Effective action of a synthesized AuthorizationPolicy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyAction {
    /// Record matches without blocking anything
    Audit,
    /// Allow the listed identities; everything else is denied
    Allow,
}

impl PolicyAction {
    /// Istio spelling of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audit => "AUDIT",
            Self::Allow => "ALLOW",
        }
    }

    /// `Audit` when auditing, `Allow` (deny-by-default) when enforcing
    pub fn from_audit(audit: bool) -> Self {
        if audit {
            Self::Audit
        } else {
            Self::Allow
        }
    }
}

/// AuthorizationPolicy spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Selector for workloads the policy applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,

    /// Rules defining who can access
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AuthorizationRule>,

    /// Action: ALLOW, DENY, AUDIT, CUSTOM
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
}

/// Workload selector for AuthorizationPolicy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Match labels
    pub match_labels: BTreeMap<String, String>,
}

impl WorkloadSelector {
    /// Select workloads labeled `app: <app>`
    pub fn app(app: impl Into<String>) -> Self {
        Self {
            match_labels: BTreeMap::from([(super::APP_LABEL.to_string(), app.into())]),
        }
    }
}

/// Authorization rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationRule {
    /// Source conditions (who is calling)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<AuthorizationSource>,
}

/// Authorization source (caller identity)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationSource {
    /// Source specification
    pub source: SourceSpec,
}

/// Source specification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SourceSpec {
    /// SPIFFE principals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
}
