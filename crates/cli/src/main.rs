//! Topology CLI
//!
//! A command-line tool for building service topologies from JSON metric
//! batches and inspecting how container identifiers are resolved.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{build, resolve};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Topology construction CLI
#[derive(Parser)]
#[command(name = "topo")]
#[command(
    author,
    version,
    about = "Build service topologies from metric batches",
    long_about = None
)]
pub struct Cli {
    /// Path to a config file (default: ~/.config/topo/config.toml)
    #[arg(long, env = "TOPO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one construction pass per batch file
    Build {
        /// Batch files (JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print construction metrics in Prometheus text format afterwards
        #[arg(long)]
        print_metrics: bool,
    },

    /// Show what a container or application identifier resolves to
    ResolveId {
        /// Identifier, e.g. /k8s/shop/api-5c6b/app
        id: String,

        /// Node name used for per-node instance names
        #[arg(long, default_value = "node")]
        node: String,

        /// Treat the identifier as an application id (/k8s/<ns>/<name>)
        #[arg(long)]
        application: bool,
    },
}

fn init_tracing(format: config::LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        config::LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        config::LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load(cli.config.as_deref())?;
    init_tracing(config.log_format);

    match cli.command {
        Commands::Build {
            files,
            print_metrics,
        } => {
            build::build(files, config, print_metrics, cli.format).await?;
        }
        Commands::ResolveId {
            id,
            node,
            application,
        } => {
            resolve::resolve_id(&id, &node, application, cli.format)?;
        }
    }

    Ok(())
}
