//! Command-line entry point for `pipeline-engine` (§6): wires the parser,
//! the reactor, and the statistics surface together and drives the loop.

use clap::Parser;
use std::{path::PathBuf, time::Duration};

/// Runs a pipeline description as a DAG of external processes connected by
/// kernel pipes.
#[derive(Parser, Debug)]
#[command(name = "pipeline-run", version, about)]
struct Opt {
    /// Pipeline description file (JSON: {"nodes": [...], "edges": [...]})
    description: PathBuf,

    /// Raise the tracing filter to debug level
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Statistics file path override
    #[arg(long, default_value = "./pipeline-stats.json")]
    stats_file: PathBuf,

    /// Statistics snapshot interval, in seconds
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

fn main() {
    let opt = Opt::parse();
    init_tracing(opt.verbose);

    if let Err(err) = run(opt) {
        tracing::error!(error = %err, "pipeline-run failed");
        eprintln!("pipeline-run: {:#}", err);
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> anyhow::Result<()> {
    let graph = pipeline_engine::load_graph(&opt.description)?;
    tracing::info!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "pipeline description loaded"
    );

    let config = pipeline_engine::ReactorConfig {
        stats_path: opt.stats_file,
        stats_interval: Duration::from_secs(opt.stats_interval),
    };
    pipeline_engine::run(graph, config)?;
    tracing::info!("pipeline finished");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}
