mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// xata-e2e -- drive the xata CLI through a pseudo-terminal.
#[derive(Parser, Debug)]
#[command(name = "xata-e2e", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scenarios of a TOML suite file
    Run {
        /// Path to the suite file
        suite: PathBuf,

        /// Binary under test (overrides XATA_BINARY)
        #[arg(long)]
        binary: Option<PathBuf>,

        /// Run the binary through this interpreter, e.g. /bin/sh
        #[arg(long)]
        interpreter: Option<PathBuf>,

        /// Env file to load, lowest priority first (default: ../.env ../.env.local)
        #[arg(long = "env-file")]
        env_files: Vec<PathBuf>,

        /// Pass --nocolor to the binary under test
        #[arg(long)]
        no_color: bool,

        /// Default expectation timeout in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Check that the test configuration loads
    CheckEnv {
        /// Env file to load, lowest priority first (default: ../.env ../.env.local)
        #[arg(long = "env-file")]
        env_files: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            suite,
            binary,
            interpreter,
            env_files,
            no_color,
            timeout_ms,
        } => commands::run::run(&commands::run::RunArgs {
            suite,
            binary,
            interpreter,
            env_files,
            no_color,
            timeout_ms,
        }),
        Commands::CheckEnv { env_files } => commands::check_env::run(&env_files),
    }
}
