//! Background thread folding worker events into counters and the state table.

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::counters::Counters;
use crate::pool::protocol::WorkerEvent;
use crate::pool::state::WorkerStates;

const IDLE_CHECK: Duration = Duration::from_millis(200);

/// Messages on the status queue.
#[derive(Debug, Clone)]
pub enum StatusMessage {
    Event(WorkerEvent),
    /// Stop sentinel
    Stop,
}

/// Owner of the status queue and its listener thread.
pub struct StatusChannel {
    tx: Sender<StatusMessage>,
    stay_alive: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl StatusChannel {
    pub fn spawn(counters: Counters, states: WorkerStates) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<StatusMessage>();
        let (done_tx, done) = channel::bounded::<()>(1);
        let stay_alive = Arc::new(AtomicBool::new(true));

        let alive = stay_alive.clone();
        let handle = std::thread::Builder::new()
            .name("workpipe-status".into())
            .spawn(move || {
                listen(&rx, &alive, &counters, &states);
                let _ = done_tx.send(());
            })
            .context("Failed to spawn status listener thread")?;

        Ok(Self {
            tx,
            stay_alive,
            done,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Sender<StatusMessage> {
        self.tx.clone()
    }

    /// Clear the stay-alive flag, post the stop sentinel and wait up to
    /// `timeout`. Returns `false` if the listener did not stop in time; the
    /// thread is then left detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.stay_alive.store(false, Ordering::SeqCst);
        let _ = self.tx.send(StatusMessage::Stop);

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

fn listen(rx: &Receiver<StatusMessage>, stay_alive: &AtomicBool, counters: &Counters, states: &WorkerStates) {
    tracing::debug!("Status listener started");
    loop {
        match rx.recv_timeout(IDLE_CHECK) {
            Ok(StatusMessage::Stop) => break,
            Ok(StatusMessage::Event(event)) => fold(event, counters, states),
            Err(RecvTimeoutError::Timeout) => {
                if !stay_alive.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Status listener stopped");
}

fn fold(event: WorkerEvent, counters: &Counters, states: &WorkerStates) {
    match event {
        WorkerEvent::Stat(delta) => {
            if let Err(e) = counters.apply(&delta) {
                tracing::error!(counter = %delta.counter, delta = delta.delta, "Failed to apply stat delta: {e:#}");
            }
        }
        WorkerEvent::State {
            worker,
            slot,
            state,
        } => states.set(&worker, slot, state),
        WorkerEvent::Outcome { job, .. } => {
            tracing::warn!(job, "Outcome delivered on the status queue, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::state::WorkerState;
    use crate::status::StatDelta;

    #[test]
    fn test_listener_folds_and_stops() {
        let counters = Counters::new();
        let states = WorkerStates::new();
        let mut channel = StatusChannel::spawn(counters.clone(), states.clone()).unwrap();

        let tx = channel.sender();
        for _ in 0..10 {
            tx.send(StatusMessage::Event(WorkerEvent::Stat(StatDelta::incr("seen"))))
                .unwrap();
        }
        tx.send(StatusMessage::Event(WorkerEvent::Stat(StatDelta::incr(""))))
            .unwrap();
        tx.send(StatusMessage::Event(WorkerEvent::state("w-0", 1, WorkerState::WaitingForTask)))
            .unwrap();

        // the stop sentinel is queued behind everything sent above
        assert!(channel.stop(Duration::from_secs(5)));
        assert_eq!(counters.get("seen"), 10);
        assert_eq!(states.get("w-0", 1), Some(WorkerState::WaitingForTask));
    }

    #[test]
    fn test_stop_is_repeatable() {
        let mut channel = StatusChannel::spawn(Counters::new(), WorkerStates::new()).unwrap();
        assert!(channel.stop(Duration::from_secs(5)));
        assert!(channel.stop(Duration::from_millis(10)));
    }
}
