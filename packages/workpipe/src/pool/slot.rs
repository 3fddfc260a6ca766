//! One cooperative slot: dequeue, handle, repeat.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use super::handler::{HandlerContext, JobHandler};
use super::protocol::WorkerEvent;
use super::source::{Fetched, TaskSource};
use super::state::WorkerState;
use super::uplink::Uplink;
use crate::error::{PipelineError, panic_message};
use crate::pipeline::{Job, Metadata, ProcessingResult};
use crate::status::{StatDelta, delta::counters};

pub(crate) struct Slot {
    pub worker: String,
    pub index: usize,
    pub source: Arc<dyn TaskSource>,
    pub uplink: Arc<dyn Uplink>,
    pub handler: Arc<dyn JobHandler>,
    pub cancel: CancellationToken,
    pub poll: Duration,
}

impl Slot {
    fn set_state(&self, state: WorkerState) {
        self.uplink
            .emit(WorkerEvent::state(&self.worker, self.index, state));
    }

    fn count(&self, counter: &str) {
        self.uplink.emit(WorkerEvent::Stat(StatDelta::incr(counter)));
    }

    fn outcome(&self, job: u64, result: ProcessingResult) {
        self.uplink.emit(WorkerEvent::Outcome { job, result });
    }

    /// Loop until a pill, cancellation or a broken work source. Item errors
    /// and handler panics never end the loop.
    pub async fn run(self) {
        let ctx = HandlerContext::new(&self.worker, self.index, self.uplink.clone());

        let final_state = loop {
            self.set_state(WorkerState::WaitingForTask);

            let source = self.source.clone();
            let poll = self.poll;
            let mut fetch = tokio::task::spawn_blocking(move || source.fetch(poll));
            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => None,
                joined = &mut fetch => Some(joined),
            };
            let Some(fetched) = fetched else {
                // A blocking fetch cannot be aborted; it returns within one poll.
                if let Ok(Ok(Fetched::Task(job))) = fetch.await {
                    self.return_unstarted(job);
                }
                break WorkerState::Cancelled;
            };

            let job = match fetched {
                Ok(Ok(Fetched::Task(job))) => job,
                Ok(Ok(Fetched::Idle)) => continue,
                Ok(Ok(Fetched::Pill)) => break WorkerState::EndedPoisonPill,
                Ok(Ok(Fetched::Closed)) => {
                    tracing::debug!(worker = %self.worker, slot = self.index, "Work queue closed");
                    break WorkerState::Cancelled;
                }
                Ok(Err(e)) => {
                    tracing::error!(worker = %self.worker, slot = self.index, "Work source failed: {e:#}");
                    break WorkerState::Crashed;
                }
                Err(e) => {
                    tracing::error!(worker = %self.worker, slot = self.index, "Fetch task failed: {e}");
                    break WorkerState::Crashed;
                }
            };

            self.count(counters::RECEIVED);
            self.set_state(WorkerState::StartingSession);

            let id = job.id;
            let label = job.item.label();
            let expects_outcome = job.expects_outcome();

            let handler = self.handler.clone();
            let item_ctx = ctx.clone();
            let mut task = tokio::spawn(async move { handler.handle(job, &item_ctx).await });

            let handled = tokio::select! {
                _ = self.cancel.cancelled() => None,
                joined = &mut task => Some(joined),
            };
            let Some(joined) = handled else {
                task.abort();
                if expects_outcome {
                    self.outcome(id, ProcessingResult::deferred());
                }
                break WorkerState::Cancelled;
            };

            match joined.map_err(handler_died).and_then(|handled| handled) {
                Ok(Some(result)) => {
                    self.count(if result.is_dropped() {
                        counters::DROPPED
                    } else {
                        counters::COMPLETED
                    });
                    self.outcome(id, result);
                }
                Ok(None) => self.count(counters::COMPLETED),
                Err(err) => {
                    let stage = err
                        .downcast_ref::<PipelineError>()
                        .and_then(PipelineError::stage)
                        .map(|s| s.to_string());
                    tracing::warn!(
                        worker = %self.worker,
                        slot = self.index,
                        item = %label,
                        stage = stage.as_deref().unwrap_or("unknown"),
                        "Item processing failed: {err:#}"
                    );
                    self.count(counters::FAILED);
                    if expects_outcome {
                        self.outcome(id, ProcessingResult::dropped(Metadata::new()));
                    }
                }
            }
        };

        tracing::debug!(worker = %self.worker, slot = self.index, state = %final_state, "Slot finished");
        self.set_state(final_state);
    }

    /// Put a job fetched during cancellation back, or defer it.
    fn return_unstarted(&self, job: Job) {
        let id = job.id;
        let label = job.item.label();
        let expects_outcome = job.expects_outcome();
        match self.source.give_back(job) {
            Ok(()) => {
                tracing::debug!(worker = %self.worker, slot = self.index, item = %label, "Returned unstarted job");
            }
            Err(e) => {
                tracing::warn!(
                    worker = %self.worker,
                    slot = self.index,
                    item = %label,
                    "Deferring unstarted job: {e:#}"
                );
                self.count(counters::DEFERRED);
                if expects_outcome {
                    self.outcome(id, ProcessingResult::deferred());
                }
            }
        }
    }
}

fn handler_died(err: JoinError) -> anyhow::Error {
    if err.is_panic() {
        anyhow::anyhow!("handler panicked: {}", panic_message(err.into_panic().as_ref()))
    } else {
        anyhow::anyhow!("handler task ended early: {err}")
    }
}
