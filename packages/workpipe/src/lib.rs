//! # workpipe - bounded worker pools for file pipelines
//!
//! workpipe distributes work items over a pool of worker processes, each of
//! which runs several cooperative slots on its own single-threaded scheduler.
//! One bounded FIFO queue feeds every slot; shutdown is cooperative through
//! poison pills, with termination as the fallback.
//!
//! ## Features
//!
//! - **Resource budget**: worker count from items, cores and live memory
//! - **File pipelines**: read, pre-process, process, post-process, name, write
//! - **Session hand-off**: accepted connections served by registered handlers
//! - **Graceful reload**: a stopping pool hands its queue to its replacement
//!
//! ## Quick Start
//!
//! ```bash
//! # Copy inputs next to themselves with a suffix, on up to 4 workers
//! workpipe run --workers 4 --outname-append .copy data/*.txt
//!
//! # Show what the budget calculator would pick
//! workpipe budget --items 100 --per-item-memory 268435456
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod parallel;
pub mod pipeline;
pub mod pool;
pub mod session;
pub mod status;

pub use cli::Cli;
pub use config::PipeConfig;
pub use error::PipelineError;
