//! Traffic query collaborator
//!
//! The dependency pipeline never talks to a time-series database directly.
//! It issues instant queries through the [`QueryApi`] trait and only
//! understands the instant-vector result shape. Two backends ship with the
//! crate:
//!
//! - [`FileQueryApi`]: evaluates the queries this crate emits against a
//!   promtool-style JSON dump held in memory
//! - [`PrometheusHttpApi`]: forwards queries to a Prometheus HTTP API

mod file;
mod http;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

pub use file::{FileQueryApi, PromtoolSample};
pub use http::PrometheusHttpApi;

/// Labels every workload query aggregates by
pub const GROUPING_LABELS: [&str; 6] = [
    crate::LABEL_SOURCE_WORKLOAD,
    crate::LABEL_SOURCE_NAMESPACE,
    crate::LABEL_SOURCE_PRINCIPAL,
    crate::LABEL_DESTINATION_WORKLOAD,
    crate::LABEL_DESTINATION_NAMESPACE,
    crate::LABEL_DESTINATION_PRINCIPAL,
];

/// A single labeled measurement from an instant vector
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Label name -> label value
    pub labels: BTreeMap<String, String>,
    /// Measured value
    pub value: f64,
}

impl Sample {
    /// Create a sample from label pairs
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>, value: f64) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            value,
        }
    }

    /// Look up a label value
    ///
    /// Empty values are treated as absent, matching Prometheus label semantics.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Look up a label value, defaulting to the empty string
    pub fn label_or_empty(&self, name: &str) -> &str {
        self.label(name).unwrap_or_default()
    }
}

/// One series of a range query result
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RangeSeries {
    /// Series labels
    pub labels: BTreeMap<String, String>,
    /// (unix seconds, value) points
    pub points: Vec<(f64, f64)>,
}

/// Decoded value of a query
#[derive(Clone, Debug, PartialEq)]
pub enum QueryValue {
    /// Instant vector
    Vector(Vec<Sample>),
    /// Single scalar
    Scalar(f64),
    /// Range vector
    Matrix(Vec<RangeSeries>),
    /// String literal
    String(String),
}

impl QueryValue {
    /// Result type name as used by the Prometheus API
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Vector(_) => "vector",
            Self::Scalar(_) => "scalar",
            Self::Matrix(_) => "matrix",
            Self::String(_) => "string",
        }
    }

    /// Take the samples of an instant vector
    ///
    /// Any other shape is an unsupported result.
    pub fn into_samples(self) -> Result<Vec<Sample>> {
        match self {
            Self::Vector(samples) => Ok(samples),
            other => Err(Error::unsupported_result(other.type_name())),
        }
    }
}

/// Query result plus any warnings the backend reported
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResponse {
    /// Decoded value
    pub value: QueryValue,
    /// Non-fatal warnings
    pub warnings: Vec<String>,
}

impl QueryResponse {
    /// Response with no warnings
    pub fn new(value: QueryValue) -> Self {
        Self {
            value,
            warnings: vec![],
        }
    }
}

/// Trait for evaluating instant queries against traffic telemetry
///
/// Implementations are awaited one query at a time; nothing in the crate
/// issues queries concurrently.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Evaluate `query` at instant `time`
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryResponse>;
}

// =============================================================================
// Workload Queries
// =============================================================================

/// Filters for a workload dependency query
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadQuery {
    /// Metric carrying source/destination workload labels
    pub metric: String,
    /// Restrict to callers in this namespace
    pub namespace: Option<String>,
    /// Restrict to callers whose name starts with this prefix
    pub name_filter: Option<String>,
}

impl WorkloadQuery {
    /// Query over every workload pair for `metric`
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            namespace: None,
            name_filter: None,
        }
    }

    /// Restrict to callers in `namespace`
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    /// Restrict to callers whose name starts with `name`
    pub fn with_name_filter(mut self, name: Option<String>) -> Self {
        self.name_filter = name.filter(|n| !n.is_empty());
        self
    }

    /// Render the PromQL expression
    pub fn expression(&self) -> String {
        let grouping = GROUPING_LABELS.join(",");

        let mut matchers = Vec::new();
        if let Some(name) = &self.name_filter {
            matchers.push(format!(
                "{}=~\"{}.*\"",
                crate::LABEL_SOURCE_WORKLOAD,
                escape_label_value(name)
            ));
        }
        if let Some(ns) = &self.namespace {
            matchers.push(format!(
                "{}=\"{}\"",
                crate::LABEL_SOURCE_NAMESPACE,
                escape_label_value(ns)
            ));
        }

        if matchers.is_empty() {
            format!("sum({}) by ({})", self.metric, grouping)
        } else {
            format!(
                "sum({}{{{}}}) by ({})",
                self.metric,
                matchers.join(", "),
                grouping
            )
        }
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Samples of one workload query, indexed by caller and callee name
#[derive(Clone, Debug, Default)]
pub struct WorkloadSamples {
    /// Every sample, in the order the backend returned them
    pub samples: Vec<Sample>,
    /// Samples grouped by `source_workload`
    pub by_source: BTreeMap<String, Vec<Sample>>,
    /// Samples grouped by `destination_workload`
    pub by_destination: BTreeMap<String, Vec<Sample>>,
}

impl WorkloadSamples {
    /// Index a sample set by workload labels
    ///
    /// Samples lacking a label are simply not indexed under it.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        let mut by_source: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        let mut by_destination: BTreeMap<String, Vec<Sample>> = BTreeMap::new();

        for sample in &samples {
            if let Some(src) = sample.label(crate::LABEL_SOURCE_WORKLOAD) {
                by_source
                    .entry(src.to_string())
                    .or_default()
                    .push(sample.clone());
            }
            if let Some(dest) = sample.label(crate::LABEL_DESTINATION_WORKLOAD) {
                by_destination
                    .entry(dest.to_string())
                    .or_default()
                    .push(sample.clone());
            }
        }

        Self {
            samples,
            by_source,
            by_destination,
        }
    }

    /// Names observed as `source_workload`
    pub fn source_names(&self) -> BTreeSet<String> {
        self.by_source.keys().cloned().collect()
    }

    /// Names observed as `destination_workload`
    pub fn destination_names(&self) -> BTreeSet<String> {
        self.by_destination.keys().cloned().collect()
    }
}

/// Run a workload query and index its samples
pub async fn query_workloads<Q: QueryApi + ?Sized>(
    api: &Q,
    query: &WorkloadQuery,
) -> Result<WorkloadSamples> {
    let expression = query.expression();
    debug!(query = %expression, "querying workload traffic");

    let response = api.query(&expression, Utc::now()).await?;
    for warning in &response.warnings {
        warn!(query = %expression, warning = %warning, "query returned warning");
    }

    let samples = response.value.into_samples()?;
    debug!(samples = samples.len(), "workload query returned");
    Ok(WorkloadSamples::from_samples(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(src: &str, dest: &str) -> Sample {
        Sample::new(
            [
                (crate::LABEL_SOURCE_WORKLOAD, src),
                (crate::LABEL_DESTINATION_WORKLOAD, dest),
            ],
            1.0,
        )
    }

    // ==========================================================================
    // Story: Query Expressions
    // ==========================================================================

    #[test]
    fn unfiltered_query_sums_by_workload_labels() {
        let q = WorkloadQuery::new("istio_tcp_sent_bytes_total");
        assert_eq!(
            q.expression(),
            "sum(istio_tcp_sent_bytes_total) by (source_workload,source_workload_namespace,\
             source_principal,destination_workload,destination_workload_namespace,\
             destination_principal)"
        );
    }

    #[test]
    fn name_filter_becomes_prefix_regex() {
        let q = WorkloadQuery::new("istio_requests_total")
            .with_name_filter(Some("web".into()));
        let prefix = "sum(istio_requests_total{source_workload=~\"web.*\"}) by (";
        assert!(q.expression().starts_with(prefix));
    }

    #[test]
    fn namespace_and_name_filters_combine() {
        let q = WorkloadQuery::new("m")
            .with_name_filter(Some("api".into()))
            .with_namespace(Some("prod".into()));
        assert!(q.expression().starts_with(
            "sum(m{source_workload=~\"api.*\", source_workload_namespace=\"prod\"}) by ("
        ));
    }

    #[test]
    fn empty_filters_are_ignored() {
        let q = WorkloadQuery::new("m")
            .with_name_filter(Some(String::new()))
            .with_namespace(Some(String::new()));
        assert_eq!(q, WorkloadQuery::new("m"));
    }

    #[test]
    fn label_values_are_escaped() {
        let q = WorkloadQuery::new("m").with_namespace(Some("a\"b".into()));
        let expr = q.expression();
        assert!(expr.contains("source_workload_namespace=\"a\\\"b\""));
    }

    // ==========================================================================
    // Story: Result Shapes
    // ==========================================================================

    #[test]
    fn only_vectors_become_samples() {
        let samples = QueryValue::Vector(vec![edge("a", "b")])
            .into_samples()
            .unwrap();
        assert_eq!(samples.len(), 1);

        for value in [
            QueryValue::Scalar(1.0),
            QueryValue::Matrix(vec![]),
            QueryValue::String("x".into()),
        ] {
            let name = value.type_name();
            match value.into_samples() {
                Err(Error::UnsupportedResult(t)) => assert_eq!(t, name),
                other => panic!("expected unsupported result, got {:?}", other),
            }
        }
    }

    #[test]
    fn empty_label_values_count_as_absent() {
        let s = Sample::new([(crate::LABEL_SOURCE_WORKLOAD, "")], 0.0);
        assert_eq!(s.label(crate::LABEL_SOURCE_WORKLOAD), None);
        assert_eq!(s.label_or_empty(crate::LABEL_DESTINATION_CLUSTER), "");
    }

    #[test]
    fn samples_are_indexed_by_both_ends() {
        let mut unlabeled = edge("x", "y");
        unlabeled.labels.remove(crate::LABEL_DESTINATION_WORKLOAD);

        let idx = WorkloadSamples::from_samples(vec![edge("a", "b"), edge("a", "c"), unlabeled]);
        assert_eq!(idx.samples.len(), 3);
        assert_eq!(idx.by_source["a"].len(), 2);
        assert_eq!(idx.by_source["x"].len(), 1);
        assert_eq!(
            idx.destination_names().into_iter().collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    // ==========================================================================
    // Story: Talking to the Collaborator
    // ==========================================================================

    #[tokio::test]
    async fn query_workloads_issues_the_rendered_expression() {
        let query = WorkloadQuery::new("istio_requests_total");
        let expected = query.expression();

        let mut api = MockQueryApi::new();
        api.expect_query()
            .withf(move |q, _| q == expected)
            .times(1)
            .returning(|_, _| {
                Ok(QueryResponse {
                    value: QueryValue::Vector(vec![edge("web", "api")]),
                    warnings: vec!["partial data".to_string()],
                })
            });

        let result = query_workloads(&api, &query).await.unwrap();
        assert_eq!(result.source_names().len(), 1);
        assert!(result.by_destination.contains_key("api"));
    }

    #[tokio::test]
    async fn query_failures_propagate_verbatim() {
        let mut api = MockQueryApi::new();
        api.expect_query()
            .returning(|_, _| Err(Error::query("connection refused")));

        let err = query_workloads(&api, &WorkloadQuery::new("m"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "query error: connection refused");
    }

    #[tokio::test]
    async fn non_vector_results_are_rejected() {
        let mut api = MockQueryApi::new();
        api.expect_query()
            .returning(|_, _| Ok(QueryResponse::new(QueryValue::String("x".into()))));

        let err = query_workloads(&api, &WorkloadQuery::new("m"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedResult(_)));
    }
}
