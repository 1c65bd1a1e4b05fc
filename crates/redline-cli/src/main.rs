//! Redline CLI
//!
//! Reads a JSON request from a file or stdin and writes the JSON result
//! to stdout. Logs go to stderr.
//!
//! ```text
//! redline evaluate  --input request.json
//! echo '{"text":"Guaranteed returns!"}' | redline correct
//! redline aggregate --input candidates.json --pretty
//! redline modules
//! ```

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redline_core::{
    Catalog, CorrectionRequest, EvaluationRequest, GateMetadata, ModuleInfo, MultiModelRequest,
};
use redline_runtime::{MultiModelAggregator, ProviderRegistry, RuntimeConfig, RuntimeOrchestrator};

#[derive(Parser)]
#[command(name = "redline")]
#[command(about = "Compliance rule evaluation and deterministic remediation", long_about = None)]
#[command(version)]
struct Cli {
    /// Rule catalog directory (built-in catalog when omitted)
    #[arg(long, global = true, env = "REDLINE_CATALOG")]
    catalog: Option<PathBuf>,

    /// Runtime config file (YAML)
    #[arg(long, global = true, env = "REDLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate text against the loaded modules
    Evaluate {
        /// Request file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Rewrite text until it passes, or report what could not be fixed
    Correct {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Generate candidates from several providers and select the safest
    Aggregate {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List loaded modules and their gates
    Modules,
}

#[derive(Serialize)]
struct ModuleListing<'a> {
    #[serde(flatten)]
    info: &'a ModuleInfo,
    gates: Vec<&'a GateMetadata>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .init();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading runtime config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let catalog = load_catalog(cli.catalog.as_deref())?;
    debug!(
        modules = catalog.modules().len(),
        workers = config.workers,
        "Catalog loaded"
    );
    let runtime = Arc::new(RuntimeOrchestrator::new(catalog, config));

    match cli.command {
        Commands::Evaluate { input } => {
            let request: EvaluationRequest = read_request(input.as_deref())?;
            let report = runtime.evaluate(&request).await.context("evaluation failed")?;
            info!(
                risk = ?report.overall_risk,
                issues = report.cross_validation_issues.len(),
                "Evaluated request"
            );
            emit(&report, cli.pretty)
        }
        Commands::Correct { input } => {
            let request: CorrectionRequest = read_request(input.as_deref())?;
            let result = runtime.correct(&request).await.context("correction failed")?;
            info!(
                termination = ?result.termination,
                corrections = result.correction_count,
                needs_human_review = result.needs_human_review,
                "Corrected request"
            );
            emit(&result, cli.pretty)
        }
        Commands::Aggregate { input } => {
            let request: MultiModelRequest = read_request(input.as_deref())?;
            let aggregator = MultiModelAggregator::new(runtime, ProviderRegistry::with_defaults());
            let result = aggregator
                .aggregate(&request)
                .await
                .context("aggregation failed")?;
            info!(
                candidates = result.responses.len(),
                selected = %result.selected.provider,
                fallback = result.fallback,
                "Aggregated candidates"
            );
            emit(&result, cli.pretty)
        }
        Commands::Modules => {
            let catalog = runtime.engine().catalog();
            let listing: Vec<ModuleListing> = catalog
                .modules()
                .modules()
                .iter()
                .map(|m| ModuleListing {
                    info: m.info(),
                    gates: m.gates().iter().map(|g| g.metadata()).collect(),
                })
                .collect();
            emit(&listing, cli.pretty)
        }
    }
}

fn load_catalog(dir: Option<&Path>) -> Result<Arc<Catalog>> {
    match dir {
        Some(dir) => Catalog::from_dir(dir)
            .map(Arc::new)
            .with_context(|| format!("loading catalog from {}", dir.display())),
        None => Catalog::builtin().context("loading built-in catalog"),
    }
}

fn read_request<T: DeserializeOwned>(input: Option<&Path>) -> Result<T> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("reading request from stdin")?;
            raw
        }
    };
    parse_request(&raw)
}

fn parse_request<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).context("request is not valid JSON for this command")
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", json).context("writing output")?;
    Ok(())
}
