use serde::{Deserialize, Serialize};

/// Counter increment produced inside a worker and folded by the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDelta {
    pub counter: String,
    pub delta: i64,
}

impl StatDelta {
    pub fn new(counter: impl Into<String>, delta: i64) -> Self {
        Self {
            counter: counter.into(),
            delta,
        }
    }

    pub fn incr(counter: impl Into<String>) -> Self {
        Self::new(counter, 1)
    }
}

/// Counter names emitted by worker slots.
pub mod counters {
    pub const RECEIVED: &str = "items_received";
    pub const COMPLETED: &str = "items_completed";
    pub const DROPPED: &str = "items_dropped";
    pub const FAILED: &str = "items_failed";
    pub const DEFERRED: &str = "items_deferred";
    pub const TRANSFERRED: &str = "items_transferred";
    pub const SESSIONS: &str = "sessions_handled";
}
