//! mesh-deps - service dependency inference for Istio meshes
//!
//! Turns traffic telemetry (Istio standard metrics) into a directed
//! workload dependency graph, then either renders it as an ASCII tree or
//! synthesizes least-privilege policies for every calling workload.
//!
//! # Pipeline
//!
//! ```text
//! QueryApi -> Adjacency -> { tree builder -> tree printer }
//!                          | { policy synthesizer -> YAML documents }
//! ```
//!
//! # Modules
//!
//! - [`query`] - Query collaborator trait, samples, file and HTTP backends
//! - [`graph`] - Adjacency construction and root discovery
//! - [`tree`] - Cycle-safe tree expansion and deterministic printing
//! - [`policy`] - Istio AuthorizationPolicy and Sidecar synthesis
//! - [`render`] - YAML document sink for synthesized policies
//! - [`config`] - Explicit run configuration
//! - [`dependencies`] - Entry points for the `tree`, `authz` and `sidecar` modes
//! - [`cli`] - Command line surface
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cli;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod graph;
pub mod policy;
pub mod query;
pub mod render;
pub mod tree;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Istio Standard Metric Labels
// =============================================================================

/// Name of the calling workload
pub const LABEL_SOURCE_WORKLOAD: &str = "source_workload";

/// Namespace of the calling workload
pub const LABEL_SOURCE_NAMESPACE: &str = "source_workload_namespace";

/// SPIFFE identity of the calling workload
pub const LABEL_SOURCE_PRINCIPAL: &str = "source_principal";

/// Name of the called workload
pub const LABEL_DESTINATION_WORKLOAD: &str = "destination_workload";

/// Namespace of the called workload
pub const LABEL_DESTINATION_NAMESPACE: &str = "destination_workload_namespace";

/// SPIFFE identity of the called workload
pub const LABEL_DESTINATION_PRINCIPAL: &str = "destination_principal";

/// Cluster of the called workload
pub const LABEL_DESTINATION_CLUSTER: &str = "destination_cluster";

/// Default metric used to discover dependencies
pub const DEFAULT_METRIC: &str = "istio_tcp_sent_bytes_total";

/// Name of the synthetic node that parents every root workload
pub const ROOT_NODE_NAME: &str = "ROOT";
