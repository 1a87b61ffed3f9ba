use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dynres_controller::{DriverConfig, DynamicResource, RunConfig};
use kube::CustomResourceExt;
use tracing::{error, info};

mod offline;

#[derive(Parser, Debug)]
#[command(name = "dynresctl", version, about = "dynres: project fields from source resources into a target")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Yaml, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the DynamicResource controller against the current kube context
    Run {
        /// Requeue delay after a successful reconcile
        #[arg(long = "recheck-secs", env = "DYNRES_RECHECK_SECS", default_value_t = 10)]
        recheck_secs: u64,
        /// Requeue delay after a failed reconcile
        #[arg(long = "retry-secs", env = "DYNRES_RETRY_SECS", default_value_t = 10)]
        retry_secs: u64,
        /// Cancel a reconcile that runs longer than this
        #[arg(long = "timeout-secs", env = "DYNRES_RECONCILE_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,
        /// Server-side apply field manager
        #[arg(long = "field-manager", env = "DYNRES_FIELD_MANAGER", default_value = dynres_kubehub::DEFAULT_FIELD_MANAGER)]
        field_manager: String,
    },
    /// Print the DynamicResource CustomResourceDefinition
    Crd,
    /// Project a DynamicResource offline against source manifests
    Project {
        /// DynamicResource manifest
        #[arg(long = "resource", short = 'f')]
        resource: String,
        /// Source manifests (multi-document YAML allowed)
        #[arg(long = "source", short = 's')]
        sources: Vec<String>,
        /// Namespace the resource is projected in (default: manifest, then "default")
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("DYNRES_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DYNRES_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DYNRES_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_value<T: serde::Serialize>(output: Output, v: &T) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", serde_yaml::to_string(v)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(v)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { recheck_secs, retry_secs, timeout_secs, field_manager } => {
            init_metrics();
            let config = RunConfig {
                driver: DriverConfig {
                    recheck_interval: Duration::from_secs(recheck_secs),
                    retry_interval: Duration::from_secs(retry_secs),
                    reconcile_timeout: timeout_secs.map(Duration::from_secs),
                },
                field_manager,
            };
            let client = dynres_kubehub::get_kube_client().await?;
            info!(?config, "starting controller");
            if let Err(e) = dynres_controller::run(client, config).await {
                error!(error = ?e, "controller exited with error");
                return Err(e);
            }
        }
        Commands::Crd => print_value(cli.output, &DynamicResource::crd())?,
        Commands::Project { resource, sources, namespace } => {
            let resource_yaml = std::fs::read_to_string(&resource).with_context(|| format!("reading {resource}"))?;
            let mut source_yamls = Vec::with_capacity(sources.len());
            for path in &sources {
                source_yamls.push(std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?);
            }
            let target = offline::project(&resource_yaml, &source_yamls, namespace.as_deref()).await?;
            print_value(cli.output, &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse_with_defaults() {
        let cli = Cli::try_parse_from(["dynresctl", "run"]).unwrap();
        match cli.command {
            Commands::Run { recheck_secs, retry_secs, timeout_secs, field_manager } => {
                assert_eq!((recheck_secs, retry_secs, timeout_secs), (10, 10, None));
                assert_eq!(field_manager, "dynres");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn project_accepts_repeated_sources() {
        let cli = Cli::try_parse_from(["dynresctl", "-o", "json", "project", "-f", "dr.yaml", "-s", "a.yaml", "-s", "b.yaml"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Project { resource, sources, namespace } => {
                assert_eq!(resource, "dr.yaml");
                assert_eq!(sources, vec!["a.yaml", "b.yaml"]);
                assert_eq!(namespace, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
