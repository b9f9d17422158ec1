//! Run configuration
//!
//! Every knob of a dependencies run lives in one [`DependencyConfig`] value
//! that is handed to [`crate::dependencies::run`]. The CLI builds it from
//! flags; library callers build it directly.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::{Error, Result};

/// Default timeout for a single query against a remote backend
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where traffic samples come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataSource {
    /// promtool JSON dump on disk
    File(PathBuf),
    /// Prometheus server base URL
    Prometheus(String),
}

/// What a dependencies run emits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// ASCII dependency tree
    #[default]
    Tree,
    /// One Istio AuthorizationPolicy per caller
    Authz,
    /// One Istio Sidecar (egress allow-list) per caller
    Sidecar,
}

/// How a caller's own namespace is found during policy synthesis
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum NamespaceLookup {
    /// Re-run the workload query narrowed to each caller
    #[default]
    Query,
    /// Use the namespace recorded while building the graph
    Graph,
}

/// Configuration of one dependencies run
#[derive(Clone, Debug, PartialEq)]
pub struct DependencyConfig {
    /// Sample source; required
    pub source: Option<DataSource>,
    /// Restrict callers to this namespace
    pub namespace: Option<String>,
    /// Restrict callers to names starting with this prefix
    pub name_filter: Option<String>,
    /// Metric carrying workload labels
    pub metric: String,
    /// Output mode
    pub output: OutputMode,
    /// Emit AUDIT rather than enforcing ALLOW authorization policies
    pub audit: bool,
    /// Namespace lookup strategy for policy synthesis
    pub namespace_lookup: NamespaceLookup,
    /// Per-query timeout for remote backends
    pub query_timeout: Duration,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            source: None,
            namespace: None,
            name_filter: None,
            metric: crate::DEFAULT_METRIC.to_string(),
            output: OutputMode::default(),
            audit: true,
            namespace_lookup: NamespaceLookup::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl DependencyConfig {
    /// The configured data source, or a configuration error
    pub fn data_source(&self) -> Result<&DataSource> {
        self.source
            .as_ref()
            .ok_or_else(|| Error::configuration("please specify --file or --prom-url"))
    }

    /// Pick a data source from the two CLI inputs; a file wins over a URL
    pub fn source_from(file: Option<PathBuf>, prom_url: Option<String>) -> Option<DataSource> {
        match (file, prom_url.filter(|u| !u.is_empty())) {
            (Some(path), _) => Some(DataSource::File(path)),
            (None, Some(url)) => Some(DataSource::Prometheus(url)),
            (None, None) => None,
        }
    }
}
