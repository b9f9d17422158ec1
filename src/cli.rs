//! Command line surface
//!
//! `mesh-deps dependencies` (alias `dep`) turns its flags into a
//! [`DependencyConfig`] and hands it to [`crate::dependencies::run`],
//! writing to stdout.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{DependencyConfig, NamespaceLookup, OutputMode};
use crate::Result;

/// mesh-deps - infer service dependencies from Istio traffic metrics
#[derive(Parser, Debug)]
#[command(name = "mesh-deps")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show workload dependencies as a tree or as synthesized policies
    #[command(visible_alias = "dep")]
    Dependencies(DependenciesArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Dependencies(args) => {
                let config = args.into_config();
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                crate::dependencies::run(&config, &mut out).await
            }
        }
    }
}

/// Flags of the `dependencies` command
#[derive(Args, Debug)]
pub struct DependenciesArgs {
    /// Output mode
    #[arg(short, long, value_enum, default_value = "tree")]
    pub output: OutputMode,

    /// promtool JSON dump to read samples from
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Prometheus base URL to query (ignored when --file is given)
    #[arg(long, env = "PROMETHEUS_URL")]
    pub prom_url: Option<String>,

    /// Only consider callers whose name starts with this prefix
    #[arg(long)]
    pub name: Option<String>,

    /// Only consider callers in this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Metric carrying workload labels
    #[arg(long, default_value = crate::DEFAULT_METRIC)]
    pub metric: String,

    /// Emit AUDIT authorization policies; `false` emits enforcing ALLOW policies
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub audit: bool,

    /// How each caller's namespace is found for authz and sidecar output
    #[arg(long, value_enum, default_value = "query")]
    pub namespace_lookup: NamespaceLookup,

    /// Timeout in seconds for each Prometheus query
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

impl DependenciesArgs {
    /// Convert parsed flags into a run configuration
    pub fn into_config(self) -> DependencyConfig {
        DependencyConfig {
            source: DependencyConfig::source_from(self.file, self.prom_url),
            namespace: self.namespace,
            name_filter: self.name,
            metric: self.metric,
            output: self.output,
            audit: self.audit,
            namespace_lookup: self.namespace_lookup,
            query_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSource;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> DependencyConfig {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Dependencies(args) => args.into_config(),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_produce_default_config() {
        let config = parse(&["mesh-deps", "dependencies", "--file", "s.json"]);
        assert_eq!(
            config,
            DependencyConfig {
                source: Some(DataSource::File(PathBuf::from("s.json"))),
                ..DependencyConfig::default()
            }
        );
    }

    #[test]
    fn alias_and_short_flags() {
        let config = parse(&[
            "mesh-deps",
            "dep",
            "-o",
            "authz",
            "-f",
            "s.json",
            "-n",
            "front",
            "--name",
            "web",
        ]);
        assert_eq!(config.output, OutputMode::Authz);
        assert_eq!(config.namespace.as_deref(), Some("front"));
        assert_eq!(config.name_filter.as_deref(), Some("web"));
    }

    #[test]
    fn policy_flags() {
        let config = parse(&[
            "mesh-deps",
            "dependencies",
            "--prom-url",
            "http://prometheus:9090",
            "--output",
            "sidecar",
            "--audit",
            "false",
            "--namespace-lookup",
            "graph",
            "--metric",
            "istio_requests_total",
            "--timeout-secs",
            "3",
        ]);
        assert_eq!(
            config.source,
            Some(DataSource::Prometheus("http://prometheus:9090".into()))
        );
        assert_eq!(config.output, OutputMode::Sidecar);
        assert!(!config.audit);
        assert_eq!(config.namespace_lookup, NamespaceLookup::Graph);
        assert_eq!(config.metric, "istio_requests_total");
        assert_eq!(config.query_timeout, Duration::from_secs(3));
    }

    #[test]
    fn bare_audit_flag_means_audit() {
        let config = parse(&["mesh-deps", "dep", "-f", "s.json", "--audit"]);
        assert!(config.audit);

        let config = parse(&["mesh-deps", "dep", "--audit", "-f", "s.json"]);
        assert!(config.audit);
        assert_eq!(
            config.source,
            Some(DataSource::File(PathBuf::from("s.json")))
        );

        let config = parse(&["mesh-deps", "dep", "-f", "s.json", "--audit", "false"]);
        assert!(!config.audit);
    }

    #[test]
    fn unknown_output_mode_is_rejected() {
        let result = Cli::try_parse_from(["mesh-deps", "dep", "-o", "endpoints"]);
        assert!(result.is_err());
    }
}
