//! annealant CLI: run and inspect adaptive training sessions.

mod commands;
mod synthetic;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// annealant: metric-driven learning-rate annealing with rollback
#[derive(Parser, Debug)]
#[command(name = "annealant", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.annealant/config.toml`)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors to stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train the built-in synthetic model under the adaptive controller
    Train(TrainArgs),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect the checkpoints of a finished or interrupted run
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

/// Command-line overrides for a training run. Unset flags keep the value
/// from the configuration layers.
#[derive(clap::Args, Debug, Default)]
struct TrainArgs {
    /// Initial learning rate
    #[arg(long)]
    lr: Option<f64>,
    /// Per-epoch decay factor once decisions start
    #[arg(long)]
    decay: Option<f64>,
    /// First epoch at which accept/reject decisions are made
    #[arg(long)]
    min_epochs: Option<usize>,
    /// Hard bound on the number of epochs
    #[arg(long)]
    max_epochs: Option<usize>,
    /// Improvement required to keep training after an accepted epoch
    #[arg(long)]
    margin: Option<f64>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Log batch progress every N batches (visible with -v)
    #[arg(long)]
    print_every: Option<usize>,
    /// Directory that receives one subdirectory per run
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// Seed for the synthetic dataset and batch shuffling
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Load and validate the configuration, reporting the first problem
    Validate,
}

#[derive(clap::Subcommand, Debug)]
enum CheckpointAction {
    /// List every checkpoint of a run
    List {
        /// Run directory (`<checkpoint_dir>/<run_id>`)
        run_dir: PathBuf,
    },
    /// Show the highest-metric retained checkpoint
    Best { run_dir: PathBuf },
    /// Compare two checkpoints by id
    Compare {
        run_dir: PathBuf,
        id_a: String,
        id_b: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // An invalid config is reported by the command itself; logs still need a home.
    let log_dir = annealant_core::read_config(Some(&workspace))
        .map(|c| workspace.join(c.output.log_dir()))
        .unwrap_or_else(|_| workspace.join("log"));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "annealant.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, &workspace).await
}
