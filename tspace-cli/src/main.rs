//! # tspace CLI
//!
//! Command-line diagnostics for tspace tuple spaces.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tspace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "tspace.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push messages through a space and report throughput
    Bench {
        /// Engine to exercise
        #[arg(long, value_enum, default_value_t = commands::Engine::Tspace)]
        engine: commands::Engine,

        /// Producer threads
        #[arg(long, default_value_t = 4)]
        producers: usize,

        /// Consumer threads
        #[arg(long, default_value_t = 4)]
        consumers: usize,

        /// Distinct keys the messages are spread over
        #[arg(long, default_value_t = 16)]
        keys: u64,

        /// Messages sent by each producer
        #[arg(long, default_value_t = 10_000)]
        messages: u64,
    },

    /// Print the contents of a persistent space snapshot
    Dump {
        /// Snapshot file written by a persistent space
        snapshot: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = commands::load_config(&cli.config)?;

    match cli.command {
        Commands::Bench {
            engine,
            producers,
            consumers,
            keys,
            messages,
        } => {
            let opts = commands::BenchOptions {
                engine,
                producers,
                consumers,
                keys,
                messages,
            };
            commands::run_bench(config, opts)
        }
        Commands::Dump { snapshot } => commands::dump_snapshot(&config, &snapshot),
    }
}
