//! Workload dependency graph
//!
//! Builds the adjacency (caller -> observed callees) from one traffic query.
//! The adjacency is read-only once built and keeps one destination entry per
//! sample: a caller/callee pair seen in several samples (for example with
//! differing principals) appears several times.
//!
//! Root workloads are callers that never show up as a callee. A graph made
//! only of cycles therefore has no roots at all.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::query::Sample;

/// Identity metadata of one observed destination
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DestinationMetadata {
    /// Destination workload name
    pub name: String,
    /// Destination workload namespace (empty when unlabeled)
    pub namespace: String,
    /// Destination SPIFFE principal (empty when unlabeled)
    pub identity: String,
    /// Destination cluster (empty when unlabeled)
    pub cluster: String,
}

impl DestinationMetadata {
    /// Metadata for a bare workload name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Derive destination metadata from a sample
    ///
    /// Returns `None` when the sample has no `destination_workload`.
    pub fn from_sample(sample: &Sample) -> Option<Self> {
        Some(Self {
            name: sample.label(crate::LABEL_DESTINATION_WORKLOAD)?.to_string(),
            namespace: sample
                .label_or_empty(crate::LABEL_DESTINATION_NAMESPACE)
                .to_string(),
            identity: sample
                .label_or_empty(crate::LABEL_DESTINATION_PRINCIPAL)
                .to_string(),
            cluster: sample
                .label_or_empty(crate::LABEL_DESTINATION_CLUSTER)
                .to_string(),
        })
    }
}

/// Caller -> observed destinations, in sample order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Adjacency {
    edges: BTreeMap<String, Vec<DestinationMetadata>>,
    /// Caller namespace from the first sample seen for each caller
    source_namespaces: BTreeMap<String, String>,
}

impl Adjacency {
    /// Build the adjacency from a sample set
    ///
    /// Samples missing `source_workload` or `destination_workload` are
    /// skipped silently.
    pub fn build<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let mut adjacency = Self::default();

        for sample in samples {
            let Some(source) = sample.label(crate::LABEL_SOURCE_WORKLOAD) else {
                trace!(labels = ?sample.labels, "skipping sample without source workload");
                continue;
            };
            let Some(destination) = DestinationMetadata::from_sample(sample) else {
                trace!(labels = ?sample.labels, "skipping sample without destination workload");
                continue;
            };

            adjacency
                .source_namespaces
                .entry(source.to_string())
                .or_insert_with(|| {
                    sample
                        .label_or_empty(crate::LABEL_SOURCE_NAMESPACE)
                        .to_string()
                });
            adjacency
                .edges
                .entry(source.to_string())
                .or_default()
                .push(destination);
        }

        adjacency
    }

    /// Append one edge
    pub fn add_edge(&mut self, source: impl Into<String>, destination: DestinationMetadata) {
        self.edges
            .entry(source.into())
            .or_default()
            .push(destination);
    }

    /// Destinations observed for `source` (empty if unknown)
    pub fn destinations(&self, source: &str) -> &[DestinationMetadata] {
        self.edges.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Namespace recorded for `source` while building
    pub fn source_namespace(&self, source: &str) -> Option<&str> {
        self.source_namespaces.get(source).map(String::as_str)
    }

    /// Iterate callers and their destinations in caller name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[DestinationMetadata])> {
        self.edges.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Caller names
    pub fn sources(&self) -> BTreeSet<String> {
        self.edges.keys().cloned().collect()
    }

    /// Every name observed as a destination
    pub fn destination_names(&self) -> BTreeSet<String> {
        self.edges
            .values()
            .flatten()
            .map(|d| d.name.clone())
            .collect()
    }

    /// Number of callers
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether no edges were recorded
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Total number of edge occurrences (duplicates included)
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Roots of this adjacency's own edges
    pub fn roots(&self) -> Vec<String> {
        find_roots(&self.sources(), &self.destination_names())
    }
}

/// Names present in `sources` but absent from `destinations`
///
/// Callers should not rely on the order of the result.
pub fn find_roots(sources: &BTreeSet<String>, destinations: &BTreeSet<String>) -> Vec<String> {
    sources.difference(destinations).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(labels: &[(&str, &str)]) -> Sample {
        Sample::new(labels.iter().copied(), 1.0)
    }

    fn edge(src: &str, dest: &str, principal: &str) -> Sample {
        sample(&[
            ("source_workload", src),
            ("source_workload_namespace", "front"),
            ("destination_workload", dest),
            ("destination_workload_namespace", "back"),
            ("destination_principal", principal),
        ])
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // ==========================================================================
    // Story: Building the Adjacency
    // ==========================================================================

    #[test]
    fn destination_metadata_comes_from_sample_labels() {
        let s = sample(&[
            ("source_workload", "web"),
            ("destination_workload", "api"),
            ("destination_workload_namespace", "back"),
            ("destination_principal", "spiffe://cluster.local/ns/back/sa/api"),
            ("destination_cluster", "east"),
        ]);
        let adjacency = Adjacency::build([&s]);

        assert_eq!(
            adjacency.destinations("web"),
            &[DestinationMetadata {
                name: "api".into(),
                namespace: "back".into(),
                identity: "spiffe://cluster.local/ns/back/sa/api".into(),
                cluster: "east".into(),
            }]
        );
    }

    #[test]
    fn optional_labels_default_to_empty() {
        let s = sample(&[("source_workload", "web"), ("destination_workload", "api")]);
        let adjacency = Adjacency::build([&s]);
        assert_eq!(
            adjacency.destinations("web"),
            &[DestinationMetadata::named("api")]
        );
        assert_eq!(adjacency.source_namespace("web"), Some(""));
    }

    #[test]
    fn samples_missing_workload_labels_are_skipped() {
        let samples = vec![
            sample(&[("destination_workload", "api")]),
            sample(&[("source_workload", "web")]),
            sample(&[("source_workload", ""), ("destination_workload", "db")]),
            edge("web", "api", "P1"),
        ];
        let adjacency = Adjacency::build(&samples);
        assert_eq!(adjacency.len(), 1);
        assert_eq!(adjacency.edge_count(), 1);
    }

    #[test]
    fn duplicate_edges_are_kept_once_per_occurrence() {
        let samples = vec![
            edge("web", "api", "P1"),
            edge("web", "api", "P1"),
            edge("web", "api", "P2"),
            edge("web", "db", "P3"),
        ];
        let adjacency = Adjacency::build(&samples);

        let names: Vec<&str> = adjacency
            .destinations("web")
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["api", "api", "api", "db"]);
        assert_eq!(adjacency.edge_count(), 4);
    }

    #[test]
    fn unknown_sources_have_no_destinations() {
        let adjacency = Adjacency::default();
        assert!(adjacency.destinations("nobody").is_empty());
        assert!(adjacency.is_empty());
        assert_eq!(adjacency.source_namespace("nobody"), None);
    }

    #[test]
    fn first_sample_decides_source_namespace() {
        let mut second = edge("web", "db", "P2");
        second
            .labels
            .insert("source_workload_namespace".into(), "other".into());
        let adjacency = Adjacency::build(&[edge("web", "api", "P1"), second]);
        assert_eq!(adjacency.source_namespace("web"), Some("front"));
    }

    // ==========================================================================
    // Story: Finding Roots
    // ==========================================================================

    #[test]
    fn roots_are_sources_never_called() {
        let roots = find_roots(&set(&["web", "api", "batch"]), &set(&["api", "db"]));
        assert_eq!(
            set(&roots.iter().map(String::as_str).collect::<Vec<_>>()),
            set(&["web", "batch"])
        );
    }

    #[test]
    fn pure_cycle_has_no_roots() {
        let adjacency = Adjacency::build(&[edge("a", "b", ""), edge("b", "a", "")]);
        assert!(adjacency.roots().is_empty());
    }

    #[test]
    fn chain_has_single_root() {
        let adjacency = Adjacency::build(&[edge("web", "api", "P1"), edge("api", "db", "P2")]);
        assert_eq!(adjacency.roots(), vec!["web".to_string()]);
        assert_eq!(adjacency.sources(), set(&["api", "web"]));
        assert_eq!(adjacency.destination_names(), set(&["api", "db"]));
    }

    #[test]
    fn add_edge_appends() {
        let mut adjacency = Adjacency::default();
        adjacency.add_edge("a", DestinationMetadata::named("b"));
        adjacency.add_edge("a", DestinationMetadata::named("b"));
        assert_eq!(adjacency.destinations("a").len(), 2);
        let collected: Vec<_> = adjacency.iter().map(|(s, d)| (s, d.len())).collect();
        assert_eq!(collected, vec![("a", 2)]);
    }
}
