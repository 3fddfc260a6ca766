//! Worker pool.
//!
//! The parent owns one bounded FIFO [`WorkQueue`]. Workers are OS processes
//! (or threads) each running a single-threaded scheduler with several
//! cooperative slots; every slot pulls one envelope at a time, so a poison
//! pill always lands behind the work queued before it.

pub mod bridge;
pub mod child;
pub mod handle;
pub mod handler;
pub mod ipc;
pub mod manager;
pub mod proc;
pub mod protocol;
pub mod queue;
mod slot;
pub mod source;
pub mod spawn;
pub mod state;
pub mod uplink;
pub mod worker;

pub use self::child::{ChildOptions, run_worker_main};
pub use self::handler::{Dispatch, HandlerContext, JobHandler};
pub use self::manager::{Backend, PoolState, ShutdownReport, TaskSink, WorkerPool, pill_flood_count};
pub use self::queue::WorkQueue;
pub use self::spawn::ProcessSpec;
pub use self::state::{WorkerState, WorkerStates};
pub use self::worker::{DEFAULT_COROUTINES, WorkerRuntime};
