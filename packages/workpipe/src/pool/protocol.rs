//! Messages exchanged with worker processes.
//!
//! Messages are JSON-serialized and newline-delimited. The child writes
//! [`ChildMessage`]s to its stdout and reads [`ParentMessage`]s from its stdin;
//! a parent message is only ever sent in answer to a `fetch`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::state::WorkerState;
use crate::pipeline::{Job, ProcessingResult};
use crate::status::StatDelta;

/// Something a worker reports back to the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Result of a file job
    Outcome { job: u64, result: ProcessingResult },
    /// Counter increment
    Stat(StatDelta),
    /// Slot state transition
    State {
        worker: String,
        slot: usize,
        state: WorkerState,
    },
}

impl WorkerEvent {
    pub fn state(worker: &str, slot: usize, state: WorkerState) -> Self {
        Self::State {
            worker: worker.to_string(),
            slot,
            state,
        }
    }
}

/// Child to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    /// The worker process is up
    Ready { worker: String, pid: u32 },
    /// A slot wants the next envelope from the shared queue
    Fetch,
    Event { event: WorkerEvent },
}

/// Parent to child, always in answer to a `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentMessage {
    Task { job: Job },
    Pill,
    /// Nothing arrived within the poll interval; ask again
    Idle,
    /// The queue is gone; the slot should exit
    Closed,
}

/// Serialize to a JSON line (with newline).
pub fn to_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

/// Deserialize from a JSON line.
pub fn from_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Options, WorkItem};

    #[test]
    fn test_lines_are_newline_terminated_and_tagged() {
        let line = to_line(&ChildMessage::Fetch).unwrap();
        assert_eq!(line, "{\"type\":\"fetch\"}\n");

        let line = to_line(&ParentMessage::Pill).unwrap();
        assert_eq!(from_line::<ParentMessage>(&line).unwrap(), ParentMessage::Pill);
    }

    #[test]
    fn test_task_carries_job() {
        let job = Job::new(7, WorkItem::file("a.txt"), Options::new()).collected();
        let line = to_line(&ParentMessage::Task { job: job.clone() }).unwrap();
        assert!(line.contains("\"kind\":\"file\""));
        assert!(line.contains("\"collect\":true"));
        assert_eq!(
            from_line::<ParentMessage>(&line).unwrap(),
            ParentMessage::Task { job }
        );
    }

    #[test]
    fn test_events_round_trip_through_child_message() {
        let event = ChildMessage::Event {
            event: WorkerEvent::Outcome {
                job: 3,
                result: ProcessingResult::deferred(),
            },
        };
        let decoded: ChildMessage = from_line(&to_line(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);

        let state = ChildMessage::Event {
            event: WorkerEvent::state("w-1", 0, WorkerState::EndedPoisonPill),
        };
        let line = to_line(&state).unwrap();
        assert!(line.contains("\"ended_poison_pill\""));
        assert_eq!(from_line::<ChildMessage>(&line).unwrap(), state);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(from_line::<ChildMessage>("not json").is_err());
        assert!(from_line::<ParentMessage>("{\"type\":\"nope\"}").is_err());
    }
}
