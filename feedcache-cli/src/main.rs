//! FeedCache CLI - Command-line host for the feed cache engine
//!
//! Runs synthetic scrolling sessions against the engine and inspects
//! configuration files.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use feedcache::logging::{init_logging, LoggingConfig};

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "feedcache")]
#[command(version, about = "Memory-bounded video feed cache and preload engine", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Drive a manager through a synthetic scrolling session
    Simulate {
        /// Number of synthetic videos to add
        #[arg(long, default_value_t = 40)]
        videos: usize,

        /// Make every K-th video point at a source that never opens (0 = never)
        #[arg(long, value_name = "K", default_value_t = 0)]
        fail_every: usize,

        /// Number of viewport positions to scroll through
        #[arg(long, default_value_t = 20)]
        scroll_steps: usize,

        /// Base latency of a synthetic resource open in milliseconds
        #[arg(long, default_value_t = 25)]
        latency_ms: u64,

        /// Time to let pending retries settle before reporting, in milliseconds
        #[arg(long, default_value_t = 4_000)]
        settle_ms: u64,

        /// Configuration file (defaults to the user config file if present)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print the diagnostics snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default().verbose(cli.verbose);
    if let Some(path) = &cli.log_file {
        logging = logging.with_log_file(path);
    }
    let _logging_guard = match init_logging(logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: failed to initialise logging: {}", e);
            None
        }
    };

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Simulate {
            videos,
            fail_every,
            scroll_steps,
            latency_ms,
            settle_ms,
            config,
            json,
        } => commands::simulate::run(SimulateArgs {
            videos,
            fail_every,
            scroll_steps,
            latency_ms,
            settle_ms,
            config,
            json,
        }),
        Commands::Config { command } => commands::config::run(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_flags() {
        let cli = Cli::parse_from([
            "feedcache",
            "--verbose",
            "simulate",
            "--videos",
            "10",
            "--fail-every",
            "3",
            "--scroll-steps",
            "4",
            "--json",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Simulate {
                videos,
                fail_every,
                scroll_steps,
                json,
                ..
            } => {
                assert_eq!((videos, fail_every, scroll_steps), (10, 3, 4));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_check() {
        let cli = Cli::parse_from(["feedcache", "config", "check", "feed.ini"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Check { .. }
            }
        ));
    }
}
