//! Resource-aware execution planning
//!
//! This module decides *how many* workers a run gets and *whether* a pool is
//! worth starting at all. It does not run pools itself; see [`crate::pool`].
//!
//! # Responsibilities
//!
//! - **Resource Discovery**: physical cores and live available memory via
//!   `system-profile`
//! - **Budget Calculation**: `min(items, max workers, memory cap)`
//! - **Strategy Selection**: inline execution for a budget of one, a pool
//!   otherwise
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │   Driver        │    │   Parallel       │    │   System        │
//! │   (Pipeline)    │───▶│   Module         │───▶│   Resources     │
//! │                 │    │                  │    │                 │
//! │ • item count    │    │ • budget         │    │ • CPU cores     │
//! │ • memory/item   │    │ • strategy       │    │ • memory        │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use workpipe::parallel::{ExecutionStrategy, WorkerBudget};
//!
//! let workers = WorkerBudget::new()
//!     .with_items(10)
//!     .with_max_workers(Some(4))
//!     .with_available_memory(Some(1000))
//!     .with_per_item_memory(Some(400))
//!     .compute()
//!     .unwrap();
//! assert_eq!(workers, 2);
//! assert_eq!(ExecutionStrategy::for_budget(workers), ExecutionStrategy::Pool { workers: 2 });
//! ```

pub mod budget;
pub mod core;

pub use self::budget::{WorkerBudget, compute_worker_count, daemon_process_count, queue_capacity};
pub use self::core::{ExecutionStrategy, SequentialExecutor};
