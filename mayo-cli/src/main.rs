//! Mayo CLI: evaluate network checkpoints and run detection geometry helpers.

mod commands;

use clap::Parser;
use mayo_core::CheckpointKey;
use mayo_core::log::PROGRESS_TARGET;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Mayo: checkpoint evaluation harness
#[derive(Parser, Debug)]
#[command(name = "mayo", version, about, long_about = None)]
struct Cli {
    /// Configuration files (YAML or TOML); later files take precedence
    #[arg(short, long = "config", global = true)]
    configs: Vec<PathBuf>,

    /// Override the evaluation batch size
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Override the checkpoint directory
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Evaluate a single checkpoint
    Eval {
        /// Checkpoint to load: an epoch number, a name, or "latest"
        #[arg(long)]
        checkpoint: Option<CheckpointKey>,
        /// Prefetch batches ahead of the evaluation loop
        #[arg(long)]
        fast: bool,
    },
    /// Evaluate every checkpoint and print a summary table
    EvalAll {
        /// Print rows as JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Prefetch batches ahead of the evaluation loop
        #[arg(long)]
        fast: bool,
    },
    /// Pairwise IOU between two box sets stored in a JSON file
    Iou {
        /// JSON file with `boxes` and `queries`, each a list of [x, y, w, h]
        file: PathBuf,
        /// Treat both sets as anchors of the form [w, h] centered at the origin
        #[arg(long)]
        anchors: bool,
        /// Use the loop-based legacy computation
        #[arg(long, conflicts_with = "anchors")]
        legacy: bool,
    },
    /// Average precision of a precision/recall curve stored in a JSON file
    Ap {
        /// JSON file with `recall` and `precision` arrays
        file: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
}

/// Stderr filter for the chosen verbosity. Per-batch progress lines only
/// show from `-v` up; the JSON log file always keeps them.
fn stderr_filter(verbose: u8, quiet: bool) -> EnvFilter {
    let directives = match verbose {
        0 if quiet => "error".to_string(),
        0 => format!("info,{PROGRESS_TARGET}=warn"),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    EnvFilter::new(directives)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr + JSON file logging
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(stderr_filter(cli.verbose, cli.quiet));

    let log_dir = directories::ProjectDirs::from("org", "mayo", "mayo")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "mayo.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let overrides = mayo_core::config::ConfigOverrides {
        batch_size: cli.batch_size,
        checkpoint_dir: cli.checkpoint_dir,
        ..Default::default()
    };
    commands::handle_command(cli.command, &cli.configs, overrides).await
}
