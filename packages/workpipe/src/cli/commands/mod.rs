use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod budget;
pub mod run;
pub mod worker;

#[derive(Parser)]
#[command(
    name = "workpipe",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run file pipelines over a bounded pool of worker processes",
    long_about = "workpipe sizes a worker pool from CPU and memory limits, distributes items \
                  through one shared FIFO queue and runs several cooperative slots per worker."
)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline over files
    Run(run::RunArgs),
    /// Show the computed worker budget and system resources
    Budget(budget::BudgetArgs),
    /// Worker process entry point (started by the pool)
    #[command(hide = true)]
    Worker(worker::WorkerArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        setup_logging(self.verbose, self.quiet);

        match self.command {
            Commands::Run(args) => run::execute(args, self.verbose, self.config.as_deref()),
            Commands::Budget(args) => budget::execute(args, self.config.as_deref()),
            Commands::Worker(args) => worker::execute(args, self.config.as_deref()),
        }
    }
}

/// Logs always go to stderr: a worker's stdout is its channel to the parent.
fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => tracing_subscriber::EnvFilter::new("warn"),
        1 => tracing_subscriber::EnvFilter::new("info"),
        2 => tracing_subscriber::EnvFilter::new("debug"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
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
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["workpipe", "-vv", "budget"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Budget(_)));
    }

    #[test]
    fn test_worker_subcommand_parses_spawn_line() {
        let cli = Cli::try_parse_from([
            "workpipe", "worker", "--name", "p-worker-0", "--coroutines", "3", "--pipeline", "copy",
            "--poll-ms", "100", "--config", "/tmp/w.toml", "-v",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/w.toml")));
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.name, "p-worker-0");
                assert_eq!(args.coroutines, 3);
                assert_eq!(args.poll_ms, 100);
            }
            _ => panic!("expected worker subcommand"),
        }
    }
}
