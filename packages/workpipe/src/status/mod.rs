//! Status channel: statistics and slot states flowing from workers to the
//! parent through a single listener thread.

pub mod counters;
pub mod delta;
pub mod listener;
pub mod report;

pub use self::counters::Counters;
pub use self::delta::StatDelta;
pub use self::listener::{StatusChannel, StatusMessage};
pub use self::report::StatsReport;
