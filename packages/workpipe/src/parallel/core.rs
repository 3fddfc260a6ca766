/// Execution strategy chosen once the worker budget is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Run every item in the calling thread, no pool is constructed
    Inline,
    /// Distribute items over a pool of `workers` worker processes
    Pool { workers: usize },
}

impl ExecutionStrategy {
    /// Strategy for a computed worker budget.
    ///
    /// A budget of one worker runs inline: spinning up a pool to feed a single
    /// worker only adds process start-up and IPC cost.
    pub fn for_budget(workers: usize) -> Self {
        if workers <= 1 {
            ExecutionStrategy::Inline
        } else {
            ExecutionStrategy::Pool { workers }
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            ExecutionStrategy::Inline => 1,
            ExecutionStrategy::Pool { workers } => *workers,
        }
    }
}

/// Sequential execution in the calling thread
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub fn execute<T, R, F, P>(work_items: &[T], processor: F, progress_reporter: Option<P>) -> Vec<R>
    where
        F: Fn(&T) -> R,
        P: Fn(usize, usize), // (current, total)
    {
        let total_items = work_items.len();
        let mut results = Vec::with_capacity(total_items);

        for (index, work_item) in work_items.iter().enumerate() {
            results.push(processor(work_item));

            let current = index + 1;
            if let Some(reporter) = &progress_reporter
                && (current % 5 == 0 || current == total_items)
            {
                reporter(current, total_items);
            }
        }

        results
    }
}
