use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gstree::{export, load_matrix, run_pipeline, RunConfig};

/// Builds a Graph Splitting tree from a similarity matrix, optionally with
/// Edge Perturbation support values.
#[derive(Parser, Debug)]
#[command(name = "gstree", version, about)]
struct Cli {
    /// Similarity matrix file (whitespace separated, optional leading row count)
    matrix: PathBuf,

    /// Number of EP iterations (0 disables EP)
    #[arg(short = 'e', long = "ep", allow_negative_numbers = true)]
    ep_num: Option<i64>,

    /// Seed for the EP random stream (0 = seed from the OS)
    #[arg(short = 'r', long = "seed")]
    seed: Option<u64>,

    /// Only log warnings and errors
    #[arg(short = 's', long)]
    silent: bool,

    /// JSON run configuration; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write per-clade EP support to this CSV file
    #[arg(long)]
    support_table: Option<PathBuf>,
}

fn init_tracing(silent: bool) {
    let default = if silent { "warn" } else { "gstree=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.silent);

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(ep_num) = cli.ep_num {
        config.ep_num = ep_num;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    config.validate()?;

    let start = Instant::now();
    let w = load_matrix(&cli.matrix)?;
    info!(
        sequences = w.size(),
        ep_num = config.ep_num,
        seed = config.seed,
        batch_size = config.resolved_batch_size(),
        "loaded {}",
        cli.matrix.display()
    );

    let mut rng = config.make_rng();
    let output = run_pipeline(&w, &config, &mut rng)?;

    if let Some(path) = &cli.support_table {
        match &output.tally {
            Some(tally) => {
                let trials = tally.trials();
                export::write_support_table(path, &output.tree, tally, trials)
                    .with_context(|| format!("writing support table {}", path.display()))?;
                info!("support table written to {}", path.display());
            }
            None => tracing::warn!("--support-table ignored: EP is disabled"),
        }
    }

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", output.text).context("writing tree to stdout")?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "done");
    Ok(())
}
