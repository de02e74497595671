use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodeflow_core::config::EngineConfig;
use nodeflow_core::event::EventBus;
use nodeflow_core::types::{Graph, RunId};
use nodeflow_engine::{topological_order, Engine, ExecutorRegistry, GraphModel, RunLogger, RunOptions};

#[derive(Parser)]
#[command(name = "nodeflow", version, about = "Run node graphs with branching, loops and parallel fan-out")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "nodeflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph and print the run response as JSON
    Run {
        /// Graph file (`{ "nodes": [...], "edges": [...] }`)
        graph: PathBuf,
        /// Write a JSONL trace of the run to this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Check a graph and print its execution order
    Validate {
        graph: PathBuf,
    },
    /// Show the effective configuration
    Config,
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid graph JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodeflow=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { graph } => {
            let model = GraphModel::new(load_graph(&graph)?)?;
            match topological_order(&model) {
                Ok(order) => {
                    let mode = if model.has_dynamic_nodes() { "dynamic" } else { "static" };
                    println!("{} nodes, {} edges, {} mode", model.len(), model.edges().len(), mode);
                    for (i, id) in order.iter().enumerate() {
                        println!("{:>3}. {}", i + 1, id);
                    }
                }
                Err(cycle) => {
                    eprintln!("{}", cycle);
                    std::process::exit(1);
                }
            }
        }
        Commands::Run { graph, log_dir } => {
            let graph = load_graph(&graph)?;
            let event_bus = Arc::new(EventBus::default());
            let run_id = RunId::new();
            let cancel = CancellationToken::new();

            let log_dir = log_dir.or_else(|| config.log.enabled.then(|| config.log_dir()));
            let logger = log_dir.map(|dir| {
                info!(dir = %dir.display(), "Writing run trace");
                RunLogger::new(dir).spawn(&event_bus, run_id.clone(), CancellationToken::new())
            });

            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling run");
                    ctrl_c.cancel();
                }
            });

            let engine = Engine::new(ExecutorRegistry::with_builtins())
                .with_config(config)
                .with_event_bus(event_bus);
            let options = RunOptions {
                run_id: Some(run_id),
                cancel,
                ..Default::default()
            };
            let response = engine.run_with(graph, options).await?;

            if let Some(handle) = logger {
                handle.await.ok();
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.succeeded() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
