use anyhow::Result;
use clap::Args;
use std::path::Path;

use crate::config::PipeConfig;
use crate::parallel::{ExecutionStrategy, WorkerBudget, daemon_process_count, queue_capacity};
use system_profile::{SystemProfile, live_available_memory};

#[derive(Args, Default)]
pub struct BudgetArgs {
    /// Number of items to plan for
    #[arg(long)]
    pub items: Option<usize>,

    /// Upper bound on workers (defaults to physical cores)
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Usable memory in bytes instead of the live measurement
    #[arg(long)]
    pub available_memory: Option<u64>,

    /// Memory one item needs, in bytes
    #[arg(long)]
    pub per_item_memory: Option<u64>,
}

pub fn execute(args: BudgetArgs, config_path: Option<&Path>) -> Result<()> {
    let settings = PipeConfig::load(config_path, None::<&()>)?.settings()?;

    let workers = WorkerBudget::new()
        .with_max_workers(args.max_workers.or(settings.pipeline.max_workers))
        .with_available_memory(args.available_memory)
        .with_memory_fraction(settings.pipeline.memory_fraction)
        .with_per_item_memory(args.per_item_memory.or(settings.pipeline.per_item_memory))
        .allow_zero();
    let workers = match args.items {
        Some(items) => workers.with_items(items),
        None => workers,
    }
    .compute()?;

    let performance = &settings.performance;
    let processes = daemon_process_count(performance.processes);

    println!("{}", SystemProfile::get().summary());
    println!("live available memory: {} bytes", live_available_memory());
    println!("batch workers: {workers}");
    match ExecutionStrategy::for_budget(workers) {
        ExecutionStrategy::Inline => println!("batch strategy: inline"),
        ExecutionStrategy::Pool { workers } => println!("batch strategy: pool of {workers}"),
    }
    println!("daemon processes: {processes}");
    println!("coroutines per process: {}", performance.coroutines);
    println!(
        "queue capacity: {}",
        queue_capacity(performance.queue_size, processes, performance.coroutines)
    );
    println!("backend: {}", performance.backend);
    Ok(())
}
