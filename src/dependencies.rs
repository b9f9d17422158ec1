//! Entry points of the `dependencies` command
//!
//! One run is strictly sequential: query the backend once, build the
//! adjacency, then either print the tree or synthesize and emit policies.
//! The first failure aborts the run.

use std::io::Write;

use tracing::{debug, info};

use crate::config::{DataSource, DependencyConfig, NamespaceLookup, OutputMode};
use crate::graph::{find_roots, Adjacency};
use crate::policy::{
    GraphNamespaceResolver, NamespaceResolver, PolicySynthesizer, QueryNamespaceResolver,
};
use crate::query::{
    query_workloads, FileQueryApi, PrometheusHttpApi, QueryApi, WorkloadQuery, WorkloadSamples,
};
use crate::render::write_documents;
use crate::tree::{build_dependency_tree, write_tree};
use crate::Result;

/// Open the query backend named by `config`
///
/// Fails with a configuration error when no source is set, before any
/// query is issued.
pub fn connect(config: &DependencyConfig) -> Result<Box<dyn QueryApi>> {
    match config.data_source()? {
        DataSource::File(path) => {
            let api = FileQueryApi::from_path(path)?;
            info!(path = %path.display(), samples = api.len(), "loaded samples from file");
            Ok(Box::new(api))
        }
        DataSource::Prometheus(url) => {
            info!(url = %url, "querying prometheus");
            Ok(Box::new(PrometheusHttpApi::new(url.clone(), config.query_timeout)?))
        }
    }
}

/// Run the command described by `config`, writing its output to `out`
pub async fn run<W: Write>(config: &DependencyConfig, out: &mut W) -> Result<()> {
    let api = connect(config)?;
    run_with_api(api.as_ref(), config, out).await
}

/// Run the command against an already opened backend
pub async fn run_with_api<Q: QueryApi + ?Sized, W: Write>(
    api: &Q,
    config: &DependencyConfig,
    out: &mut W,
) -> Result<()> {
    let query = WorkloadQuery::new(config.metric.clone())
        .with_namespace(config.namespace.clone())
        .with_name_filter(config.name_filter.clone());
    let samples = query_workloads(api, &query).await?;
    let adjacency = Adjacency::build(&samples.samples);
    debug!(
        sources = adjacency.len(),
        edges = adjacency.edge_count(),
        "built adjacency"
    );

    match config.output {
        OutputMode::Tree => print_dependency_tree(&samples, &adjacency, out),
        OutputMode::Authz => emit_authorization_policies(api, config, &adjacency, out).await,
        OutputMode::Sidecar => emit_sidecars(api, config, &adjacency, out).await,
    }
}

/// Print the tree of every root found in `samples`
///
/// A graph whose workloads all sit on cycles has no roots and prints only
/// the `.` line.
pub fn print_dependency_tree<W: Write>(
    samples: &WorkloadSamples,
    adjacency: &Adjacency,
    out: &mut W,
) -> Result<()> {
    let roots = find_roots(&samples.source_names(), &samples.destination_names());
    debug!(roots = roots.len(), "found root workloads");

    let tree = build_dependency_tree(adjacency, &roots);
    write_tree(out, &tree)?;
    out.flush()?;
    Ok(())
}

/// Emit one AuthorizationPolicy document per caller with destinations
pub async fn emit_authorization_policies<Q: QueryApi + ?Sized, W: Write>(
    api: &Q,
    config: &DependencyConfig,
    adjacency: &Adjacency,
    out: &mut W,
) -> Result<()> {
    let synthesizer = PolicySynthesizer::new(adjacency, config.audit);
    let policies = match config.namespace_lookup {
        NamespaceLookup::Query => {
            synthesizer
                .authorization_policies(&query_resolver(api, config))
                .await?
        }
        NamespaceLookup::Graph => {
            synthesizer
                .authorization_policies(&GraphNamespaceResolver::new(adjacency))
                .await?
        }
    };
    write_documents(out, &policies)
}

/// Emit one Sidecar document per caller with destinations
pub async fn emit_sidecars<Q: QueryApi + ?Sized, W: Write>(
    api: &Q,
    config: &DependencyConfig,
    adjacency: &Adjacency,
    out: &mut W,
) -> Result<()> {
    let synthesizer = PolicySynthesizer::new(adjacency, config.audit);
    let sidecars = match config.namespace_lookup {
        NamespaceLookup::Query => synthesizer.sidecars(&query_resolver(api, config)).await?,
        NamespaceLookup::Graph => {
            synthesizer
                .sidecars(&GraphNamespaceResolver::new(adjacency))
                .await?
        }
    };
    write_documents(out, &sidecars)
}

fn query_resolver<'a, Q: QueryApi + ?Sized>(
    api: &'a Q,
    config: &DependencyConfig,
) -> impl NamespaceResolver + 'a {
    QueryNamespaceResolver::new(api, config.metric.clone(), config.namespace.clone())
}
