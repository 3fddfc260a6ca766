use anyhow::Result;
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipeConfig;
use crate::pool::{ChildOptions, DEFAULT_COROUTINES, run_worker_main};
use crate::session::HandlerRegistry;

#[derive(Args)]
pub struct WorkerArgs {
    /// Worker name used in states and logs
    #[arg(long)]
    pub name: String,

    /// Cooperative slots in this worker
    #[arg(long, default_value_t = DEFAULT_COROUTINES)]
    pub coroutines: usize,

    /// Registered pipeline for file jobs
    #[arg(long, default_value = "copy")]
    pub pipeline: String,

    /// How long the parent waits on the queue before answering idle
    #[arg(long, default_value_t = 250)]
    pub poll_ms: u64,
}

pub fn execute(args: WorkerArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Arc::new(PipeConfig::load(config_path, None::<&()>)?);
    let registry = HandlerRegistry::with_builtins(config);

    tracing::debug!(worker = %args.name, pid = std::process::id(), "Worker process starting");
    run_worker_main(
        ChildOptions {
            name: args.name,
            coroutines: args.coroutines,
            pipeline: args.pipeline,
            poll: Duration::from_millis(args.poll_ms),
        },
        registry,
    )
}
