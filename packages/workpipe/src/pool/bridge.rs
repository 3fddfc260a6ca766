//! Parent-side threads connecting a worker process to the shared queue.
//!
//! ```text
//!            stdout: ready / fetch / event
//!  child ───────────────────────────────▶ reader ──▶ status listener / outcomes
//!    ▲                                      │ fetch
//!    │       stdin: task / pill / idle      ▼
//!    └──────────────────────────────────  feeder ◀── shared work queue
//! ```
//!
//! The feeder only dequeues when the child asks, so process workers pull from
//! the shared FIFO exactly like thread workers do.

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::process::{ChildStdin, ChildStdout};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::ipc::{LineReader, LineWriter};
use super::proc::WorkerProc;
use super::protocol::{ChildMessage, ParentMessage, from_line, to_line};
use super::queue::WorkQueue;
use super::source::{Fetched, QueueSource, TaskSource};
use super::uplink::{LocalUplink, Uplink};
use crate::pipeline::Envelope;

impl From<Fetched> for ParentMessage {
    fn from(fetched: Fetched) -> Self {
        match fetched {
            Fetched::Task(job) => ParentMessage::Task { job },
            Fetched::Pill => ParentMessage::Pill,
            Fetched::Idle => ParentMessage::Idle,
            Fetched::Closed => ParentMessage::Closed,
        }
    }
}

/// Start the reader and feeder threads for `proc`. `alive` is decremented
/// when the child's stdout reaches EOF.
pub fn attach(
    proc: &mut WorkerProc,
    queue: WorkQueue,
    uplink: LocalUplink,
    poll: Duration,
    alive: Arc<AtomicUsize>,
) -> Result<Vec<JoinHandle<()>>> {
    let (stdin, stdout) = proc.take_pipes()?;
    let name = proc.name().to_string();
    let (fetch_tx, fetch_rx) = channel::unbounded::<()>();

    let reader_name = name.clone();
    let reader = std::thread::Builder::new()
        .name(format!("{name}-reader"))
        .spawn(move || {
            read_child(&reader_name, stdout, &fetch_tx, &uplink);
            alive.fetch_sub(1, Ordering::SeqCst);
        })
        .context("Failed to spawn worker reader thread")?;

    let feeder_name = name.clone();
    let feeder = std::thread::Builder::new()
        .name(format!("{name}-feeder"))
        .spawn(move || feed_child(&feeder_name, stdin, &fetch_rx, &queue, poll))
        .context("Failed to spawn worker feeder thread")?;

    Ok(vec![reader, feeder])
}

fn read_child(name: &str, stdout: ChildStdout, fetch_tx: &Sender<()>, uplink: &LocalUplink) {
    let mut reader = LineReader::new(stdout);
    loop {
        let line = match reader.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(worker = name, "Failed to read from worker: {e}");
                break;
            }
        };
        match from_line::<ChildMessage>(line) {
            Ok(ChildMessage::Fetch) => {
                if fetch_tx.send(()).is_err() {
                    break;
                }
            }
            Ok(ChildMessage::Event { event }) => uplink.emit(event),
            Ok(ChildMessage::Ready { worker, pid }) => {
                tracing::debug!(worker = %worker, pid, "Worker process ready");
            }
            Err(e) => tracing::warn!(worker = name, "Invalid worker message: {e}"),
        }
    }
    tracing::debug!(worker = name, "Worker output closed");
}

fn feed_child(name: &str, stdin: ChildStdin, fetch_rx: &Receiver<()>, queue: &WorkQueue, poll: Duration) {
    let mut writer = LineWriter::new(stdin);
    let source = QueueSource::new(queue.clone());

    while fetch_rx.recv().is_ok() {
        let reply: ParentMessage = match source.fetch(poll) {
            Ok(fetched) => fetched.into(),
            Err(e) => {
                tracing::error!(worker = name, "Work queue unavailable: {e:#}");
                ParentMessage::Closed
            }
        };

        let sent = to_line(&reply)
            .map_err(anyhow::Error::from)
            .and_then(|line| writer.write_line(&line).map_err(anyhow::Error::from));

        if let Err(e) = sent {
            tracing::warn!(worker = name, "Failed to hand work to worker: {e:#}");
            requeue(name, queue, reply);
            break;
        }
    }
}

/// Put an envelope the child never received back on the queue.
fn requeue(name: &str, queue: &WorkQueue, reply: ParentMessage) {
    let envelope = match reply {
        ParentMessage::Task { job } => Envelope::Task(job),
        ParentMessage::Pill => Envelope::Pill,
        ParentMessage::Idle | ParentMessage::Closed => return,
    };
    if let Err(e) = queue.try_push(envelope) {
        tracing::error!(worker = name, "Envelope lost after worker pipe failure: {e}");
    }
}
