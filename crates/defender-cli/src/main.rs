//! DDoS Defender CLI
//!
//! Command-line front end over `defender-core`.
//!
//! # Usage
//!
//! ```bash
//! defender detect --input windows.jsonl --model models/ddqn.bin --learn
//! defender train --dataset traffic.json --out models/ddqn.bin --episodes 200
//! defender inspect --model models/ddqn.bin
//! defender config --out defender.json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "defender")]
#[command(version)]
#[command(about = "DDoS detection with Double DQN", long_about = None)]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long, short, global = true, env = "DEFENDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection over recorded traffic windows
    Detect {
        /// JSON lines file, one window per line
        #[arg(long, short)]
        input: PathBuf,
        /// Persisted model to start from
        #[arg(long, short)]
        model: Option<PathBuf>,
        /// Learn online from the processed windows
        #[arg(long)]
        learn: bool,
        /// Segment for windows that do not name one
        #[arg(long, default_value = "default")]
        segment: String,
        /// Decide with the threshold heuristic only
        #[arg(long)]
        heuristic: bool,
    },
    /// Train a model from a labeled dataset
    Train {
        #[arg(long, short)]
        dataset: PathBuf,
        /// Where to write the parameter blob
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long, default_value_t = 100)]
        episodes: usize,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Describe a persisted model
    Inspect {
        #[arg(long, short)]
        model: PathBuf,
    },
    /// Write the default configuration
    Config {
        #[arg(long, short)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Detect {
            input,
            model,
            learn,
            segment,
            heuristic,
        } => commands::load_config(config_path)
            .and_then(|config| commands::detect::handle(config, &input, model, learn, &segment, heuristic)),
        Commands::Train {
            dataset,
            out,
            episodes,
            batch_size,
            seed,
        } => commands::load_config(config_path)
            .and_then(|config| commands::train::handle(config, &dataset, &out, episodes, batch_size, seed)),
        Commands::Inspect { model } => commands::inspect::handle(&model),
        Commands::Config { out } => commands::config::handle(&out),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
