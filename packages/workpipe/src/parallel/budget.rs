//! Resource budget: how many workers can run at once.
//!
//! The calculation only looks at system resources and the caller's limits; it
//! knows nothing about what the workers do.

use crate::error::PipelineError;
use system_profile::{SystemProfile, live_available_memory};

/// Default share of live available memory a pipeline may plan to use.
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.8;

/// Inputs to the worker budget. Unset fields fall back to live system values.
#[derive(Debug, Clone)]
pub struct WorkerBudget {
    /// Number of items to process (defaults to `max_workers`)
    pub item_count: Option<usize>,
    /// Upper bound on workers (defaults to physical cores)
    pub max_workers: Option<usize>,
    /// Usable memory in bytes; overrides the live query when set
    pub available_memory: Option<u64>,
    /// Fraction of live available memory used when `available_memory` is unset
    pub memory_fraction: f64,
    /// Memory one item needs while being processed, in bytes
    pub per_item_memory: Option<u64>,
    /// Fail with `ResourceExhausted` instead of returning 0
    pub error_if_zero: bool,
}

impl Default for WorkerBudget {
    fn default() -> Self {
        Self {
            item_count: None,
            max_workers: None,
            available_memory: None,
            memory_fraction: DEFAULT_MEMORY_FRACTION,
            per_item_memory: None,
            error_if_zero: true,
        }
    }
}

impl WorkerBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(mut self, item_count: usize) -> Self {
        self.item_count = Some(item_count);
        self
    }

    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_available_memory(mut self, bytes: Option<u64>) -> Self {
        self.available_memory = bytes;
        self
    }

    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    pub fn with_per_item_memory(mut self, bytes: Option<u64>) -> Self {
        self.per_item_memory = bytes;
        self
    }

    pub fn allow_zero(mut self) -> Self {
        self.error_if_zero = false;
        self
    }

    /// Compute `min(item_count, max_workers, memory cap)`.
    ///
    /// # Algorithm
    /// ```text
    /// max_workers  = given, else physical cores
    /// item_count   = given, else max_workers
    /// usable       = available_memory, else memory_fraction * live available memory
    /// memory_cap   = max_workers if per_item_memory unset, else floor(usable / per_item_memory)
    /// result       = min(item_count, max_workers, memory_cap)
    /// ```
    pub fn compute(&self) -> Result<usize, PipelineError> {
        let max_workers = self
            .max_workers
            .unwrap_or_else(SystemProfile::physical_cpu_count);
        let item_count = self.item_count.unwrap_or(max_workers);

        let memory_cap = match self.per_item_memory {
            None => max_workers,
            Some(0) => max_workers,
            Some(per_item) => {
                let usable = self.usable_memory();
                usize::try_from(usable / per_item).unwrap_or(usize::MAX)
            }
        };

        let workers = item_count.min(max_workers).min(memory_cap);

        tracing::debug!(
            item_count,
            max_workers,
            memory_cap,
            workers,
            "Computed worker budget"
        );

        if workers == 0 && self.error_if_zero {
            return Err(PipelineError::ResourceExhausted {
                item_count,
                max_workers,
                memory_cap,
            });
        }
        Ok(workers)
    }

    fn usable_memory(&self) -> u64 {
        match self.available_memory {
            Some(bytes) => bytes,
            None => {
                let fraction = self.memory_fraction.clamp(0.0, 1.0);
                (live_available_memory() as f64 * fraction) as u64
            }
        }
    }
}

/// Free-function form of [`WorkerBudget::compute`].
pub fn compute_worker_count(
    item_count: Option<usize>,
    max_workers: Option<usize>,
    available_memory: Option<u64>,
    memory_fraction: f64,
    per_item_memory: Option<u64>,
    error_if_zero: bool,
) -> Result<usize, PipelineError> {
    WorkerBudget {
        item_count,
        max_workers,
        available_memory,
        memory_fraction,
        per_item_memory,
        error_if_zero,
    }
    .compute()
}

/// Process count for a long-running pool: a configured value below 1 means
/// two processes per logical CPU.
pub fn daemon_process_count(configured: usize) -> usize {
    if configured < 1 {
        SystemProfile::cpu_count() * 2
    } else {
        configured
    }
}

/// Work queue capacity: the configured size, or 1.5 slots of headroom per
/// coroutine when unset.
pub fn queue_capacity(configured: usize, processes: usize, coroutines: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    let slots = processes.max(1) * coroutines.max(1);
    (slots * 3).div_ceil(2).max(1)
}
