//! Per-slot worker state table, kept in the parent and fed by worker events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Created,
    WaitingForTask,
    StartingSession,
    EndedPoisonPill,
    Cancelled,
    Crashed,
}

impl WorkerState {
    /// Whether the slot has left its loop for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::EndedPoisonPill | WorkerState::Cancelled | WorkerState::Crashed
        )
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WorkerState::Created => "created",
            WorkerState::WaitingForTask => "waiting for task",
            WorkerState::StartingSession => "starting scan session",
            WorkerState::EndedPoisonPill => "ended (poison pill)",
            WorkerState::Cancelled => "cancelled",
            WorkerState::Crashed => "crashed",
        };
        f.write_str(text)
    }
}

/// Worker name to per-slot states.
#[derive(Debug, Clone, Default)]
pub struct WorkerStates {
    inner: Arc<RwLock<BTreeMap<String, Vec<WorkerState>>>>,
}

impl WorkerStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker: &str, slots: usize) {
        if let Ok(mut table) = self.inner.write() {
            table.insert(worker.to_string(), vec![WorkerState::Created; slots]);
        }
    }

    pub fn set(&self, worker: &str, slot: usize, state: WorkerState) {
        let Ok(mut table) = self.inner.write() else {
            tracing::warn!(worker, slot, %state, "Worker state table unavailable");
            return;
        };
        let slots = table.entry(worker.to_string()).or_default();
        if slots.len() <= slot {
            slots.resize(slot + 1, WorkerState::Created);
        }
        slots[slot] = state;
    }

    /// Drop a worker's rows; only call once the worker has been joined.
    pub fn remove(&self, worker: &str) {
        if let Ok(mut table) = self.inner.write() {
            table.remove(worker);
        }
    }

    pub fn get(&self, worker: &str, slot: usize) -> Option<WorkerState> {
        self.inner
            .read()
            .ok()
            .and_then(|table| table.get(worker).and_then(|slots| slots.get(slot).copied()))
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<WorkerState>> {
        self.inner.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// Human-readable listing, one block per worker.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (worker, slots) in self.snapshot() {
            let _ = writeln!(out, "{worker}:");
            for (slot, state) in slots.iter().enumerate() {
                let _ = writeln!(out, "  [{slot}] {state}");
            }
        }
        if out.is_empty() {
            out.push_str("no workers\n");
        }
        out
    }
}
