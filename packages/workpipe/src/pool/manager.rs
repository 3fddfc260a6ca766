//! The worker pool: owns the shared work queue, the workers, and the status
//! listener, and runs the shutdown and hand-off protocol.

use anyhow::{Result, bail};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::bridge;
use super::handle::{ProcessWorker, ThreadWorker, WorkerHandle, join_with_escalation};
use super::handler::JobHandler;
use super::queue::WorkQueue;
use super::source::QueueSource;
use super::spawn::{ProcessSpec, spawn_worker};
use super::state::WorkerStates;
use super::uplink::LocalUplink;
use crate::config::PerformanceSettings;
use crate::error::PipelineError;
use crate::parallel::queue_capacity;
use crate::pipeline::{Envelope, Job, Options, ProcessingResult, WorkItem};
use crate::session::HandlerRegistry;
use crate::status::{Counters, StatDelta, StatsReport, StatusChannel, StatusMessage, delta::counters};

/// How workers are run.
#[derive(Clone)]
pub enum Backend {
    /// Dedicated threads in this process, each with its own scheduler
    Thread { handler: Arc<dyn JobHandler> },
    /// Worker processes re-executing a binary with the `worker` subcommand
    Process(ProcessSpec),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Thread { .. } => f.write_str("Thread"),
            Backend::Process(spec) => f.debug_tuple("Process").field(spec).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

/// What happened during [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub pills_requested: usize,
    pub pills_sent: usize,
    /// The manager's own drain pill made it onto the queue
    pub extra_pill: bool,
    /// Jobs re-enqueued on the hand-off target
    pub transferred: usize,
    /// Jobs answered with "retry later" instead of being processed
    pub deferred: usize,
    pub joined: usize,
    pub terminated: usize,
    pub killed: usize,
    pub listener_stopped: bool,
}

/// Anything that accepts jobs; the hand-off target of a shutdown.
pub trait TaskSink: Send + Sync {
    /// Returns `false` when the job was not accepted.
    fn add_job(&self, job: Job) -> bool;
}

/// Pills needed to end every slot, bounded by what the queue can hold.
pub fn pill_flood_count(workers: usize, coroutines: usize, capacity: usize) -> usize {
    workers.saturating_mul(coroutines).min(capacity)
}

/// Bounded pool of workers pulling from one FIFO queue.
///
/// Every method takes `&self`, so a pool can be shared behind an `Arc` while
/// producers add work and another thread shuts it down.
pub struct WorkerPool {
    name: String,
    backend: Backend,
    settings: PerformanceSettings,
    registry: Option<Arc<HandlerRegistry>>,
    state: RwLock<PoolState>,
    queue: OnceLock<WorkQueue>,
    workers: Mutex<Vec<Box<dyn WorkerHandle>>>,
    worker_count: AtomicUsize,
    alive: Arc<AtomicUsize>,
    status: Mutex<Option<StatusChannel>>,
    counters: Counters,
    states: WorkerStates,
    outcome_tx: Sender<(u64, ProcessingResult)>,
    outcome_rx: Receiver<(u64, ProcessingResult)>,
    collecting: Mutex<()>,
    next_job: AtomicU64,
    started: OnceLock<Instant>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, backend: Backend, settings: PerformanceSettings) -> Self {
        let (outcome_tx, outcome_rx) = channel::unbounded();
        Self {
            name: name.into(),
            backend,
            settings,
            registry: None,
            state: RwLock::new(PoolState::Created),
            queue: OnceLock::new(),
            workers: Mutex::new(Vec::new()),
            worker_count: AtomicUsize::new(0),
            alive: Arc::new(AtomicUsize::new(0)),
            status: Mutex::new(None),
            counters: Counters::new(),
            states: WorkerStates::new(),
            outcome_tx,
            outcome_rx,
            collecting: Mutex::new(()),
            next_job: AtomicU64::new(1),
            started: OnceLock::new(),
        }
    }

    /// Registry used to answer sessions deferred at shutdown.
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PoolState {
        *self.read_state()
    }

    /// Workers started by [`start`](Self::start).
    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    /// Workers whose slots have not all exited yet.
    pub fn alive_workers(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.queue.get().map_or(0, WorkQueue::capacity)
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn states(&self) -> &WorkerStates {
        &self.states
    }

    /// Spawn `workers` workers and the status listener.
    pub fn start(&self, workers: usize) -> Result<()> {
        let coroutines = self.settings.coroutines.max(1);
        let queue = {
            let mut state = self.write_state();
            if *state != PoolState::Created {
                bail!(PipelineError::Worker(format!(
                    "pool {} cannot start from state {:?}",
                    self.name, *state
                )));
            }

            let capacity = queue_capacity(self.settings.queue_size, workers, coroutines);
            let queue = self.queue.get_or_init(|| WorkQueue::bounded(capacity)).clone();

            let status = StatusChannel::spawn(self.counters.clone(), self.states.clone())?;
            *self.lock_status() = Some(status);
            let _ = self.started.set(Instant::now());
            *state = PoolState::Running;
            queue
        };

        let uplink = match self.lock_status().as_ref() {
            Some(status) => LocalUplink::new(status.sender(), self.outcome_tx.clone()),
            None => bail!(PipelineError::Worker("status listener missing".into())),
        };

        tracing::info!(
            pool = %self.name,
            backend = ?self.backend,
            workers,
            coroutines,
            capacity = queue.capacity(),
            "Starting worker pool"
        );

        for index in 0..workers {
            let name = format!("{}-worker-{index}", self.name);
            if let Err(e) = self.spawn_one(&name, coroutines, &queue, &uplink) {
                tracing::error!(pool = %self.name, worker = %name, "Failed to start worker: {e:#}");
                self.shutdown(None);
                return Err(e.context(format!("Failed to start pool {}", self.name)));
            }
            self.worker_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn spawn_one(&self, name: &str, coroutines: usize, queue: &WorkQueue, uplink: &LocalUplink) -> Result<()> {
        let poll = self.settings.poll_interval();
        self.states.register(name, coroutines);
        self.alive.fetch_add(1, Ordering::SeqCst);

        let handle: Result<Box<dyn WorkerHandle>> = match &self.backend {
            Backend::Thread { handler } => {
                let cancel = CancellationToken::new();
                let runtime = super::worker::WorkerRuntime::new(
                    name,
                    Arc::new(QueueSource::new(queue.clone())),
                    Arc::new(uplink.clone()),
                    handler.clone(),
                )
                .with_coroutines(coroutines)
                .with_poll(poll)
                .with_cancel(cancel.clone());

                let alive = self.alive.clone();
                let worker = name.to_string();
                std::thread::Builder::new()
                    .name(name.to_string())
                    .spawn(move || {
                        if let Err(e) = runtime.run() {
                            tracing::error!(worker = %worker, "Worker failed: {e:#}");
                        }
                        alive.fetch_sub(1, Ordering::SeqCst);
                    })
                    .map(|thread| Box::new(ThreadWorker::new(name, thread, cancel)) as Box<dyn WorkerHandle>)
                    .map_err(anyhow::Error::from)
            }
            Backend::Process(spec) => spawn_worker(spec, name, coroutines, poll).and_then(|mut proc| {
                match bridge::attach(&mut proc, queue.clone(), uplink.clone(), poll, self.alive.clone()) {
                    Ok(threads) => Ok(Box::new(ProcessWorker::new(proc, threads)) as Box<dyn WorkerHandle>),
                    Err(e) => {
                        if let Err(kill) = proc.kill() {
                            tracing::error!(worker = name, "Failed to kill unattached worker: {kill:#}");
                        }
                        Err(e)
                    }
                }
            }),
        };

        match handle {
            Ok(handle) => {
                self.lock_workers().push(handle);
                Ok(())
            }
            Err(e) => {
                self.alive.fetch_sub(1, Ordering::SeqCst);
                self.states.remove(name);
                Err(e)
            }
        }
    }

    /// Allocate a job id unique within this pool.
    pub fn next_job_id(&self) -> u64 {
        self.next_job.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue a file or session item with no options. Nothing waits for its
    /// result; only [`map`](Self::map) collects outcomes.
    pub fn add_task(&self, item: WorkItem) -> bool {
        self.add_job(Job::new(self.next_job_id(), item, Options::new()))
    }

    /// Enqueue `job` while the pool is running, waiting for room. Returns
    /// `false` when the pool is not running or no worker is left to make room.
    fn enqueue(&self, job: Job) -> bool {
        // The read guard is held until the job is queued, so shutdown cannot
        // flood pills ahead of a job that is still being added.
        let state = self.read_state();
        if *state != PoolState::Running {
            tracing::debug!(pool = %self.name, item = %job.item.label(), state = ?*state, "Pool not running, dropping task");
            return false;
        }
        let Some(queue) = self.queue.get() else {
            return false;
        };

        let poll = self.settings.poll_interval();
        let mut envelope = Envelope::Task(job);
        loop {
            match queue.push_timeout(envelope, poll) {
                Ok(()) => return true,
                Err(back) => {
                    if self.alive.load(Ordering::SeqCst) == 0 {
                        tracing::warn!(pool = %self.name, "Work queue full and no workers alive, dropping task");
                        return false;
                    }
                    envelope = back;
                }
            }
        }
    }

    /// Run `paths` as file jobs and collect one result per path, in
    /// submission order. Paths that never produce an outcome come back
    /// deferred.
    pub fn map(&self, paths: &[String], options: &Options) -> Vec<ProcessingResult> {
        let _collecting = self.collecting.lock().unwrap_or_else(PoisonError::into_inner);

        let mut results: Vec<Option<ProcessingResult>> = vec![None; paths.len()];
        let mut pending: HashMap<u64, usize> = HashMap::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let id = self.next_job_id();
            if self.enqueue(Job::new(id, WorkItem::file(path.as_str()), options.clone()).collected()) {
                pending.insert(id, index);
            }
        }

        let poll = self.settings.poll_interval();
        while !pending.is_empty() {
            match self.outcome_rx.recv_timeout(poll) {
                Ok((id, result)) => {
                    if let Some(index) = pending.remove(&id) {
                        results[index] = Some(result);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.alive.load(Ordering::SeqCst) == 0 {
                        tracing::warn!(pool = %self.name, missing = pending.len(), "Workers gone before all results arrived");
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(ProcessingResult::deferred))
            .collect()
    }

    /// Stop the pool. With a `target`, queued work is handed to it instead of
    /// being deferred and workers get longer to finish what they hold.
    pub fn shutdown(&self, target: Option<&dyn TaskSink>) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        {
            let mut state = self.write_state();
            match *state {
                PoolState::Running => *state = PoolState::ShuttingDown,
                PoolState::Created => {
                    *state = PoolState::Stopped;
                    return report;
                }
                PoolState::ShuttingDown | PoolState::Stopped => {
                    tracing::debug!(pool = %self.name, state = ?*state, "Shutdown already done or in progress");
                    return report;
                }
            }
        }

        tracing::info!(pool = %self.name, handoff = target.is_some(), "Shutting down worker pool");
        let poll = self.settings.poll_interval();

        if let Some(queue) = self.queue.get() {
            report.pills_requested =
                pill_flood_count(self.worker_count(), self.settings.coroutines.max(1), queue.capacity());
            for _ in 0..report.pills_requested {
                if queue.push_timeout(Envelope::Pill, poll).is_err() {
                    tracing::warn!(pool = %self.name, sent = report.pills_sent, "Work queue full, stopping pill flood");
                    break;
                }
                report.pills_sent += 1;
            }
            report.extra_pill = queue.push_timeout(Envelope::Pill, poll).is_ok();

            // Drain what is ahead of the first pill.
            while let Some(envelope) = queue.recv_timeout(poll) {
                match envelope {
                    Envelope::Pill => break,
                    Envelope::Task(job) => self.release(job, target, &mut report),
                }
            }
        }

        let join_timeout = if target.is_some() {
            self.settings.handoff_join_timeout()
        } else {
            self.settings.join_timeout()
        };
        let mut workers = std::mem::take(&mut *self.lock_workers());
        let summary = join_with_escalation(&mut workers, join_timeout, self.settings.terminate_grace());
        report.joined = summary.joined;
        report.terminated = summary.terminated;
        report.killed = summary.killed;

        // Work a feeder put back after its worker died is still queued.
        if let Some(queue) = self.queue.get() {
            while let Some(envelope) = queue.recv_timeout(Duration::ZERO) {
                if let Envelope::Task(job) = envelope {
                    self.release(job, target, &mut report);
                }
            }
        }

        report.listener_stopped = match self.lock_status().as_mut() {
            Some(status) => status.stop(self.settings.listener_stop_timeout()),
            None => true,
        };
        if !report.listener_stopped {
            tracing::error!(pool = %self.name, "Status listener did not stop in time");
        }

        let mut joined_names = Vec::new();
        for worker in workers.iter_mut() {
            if worker.is_finished() {
                joined_names.push(worker.name().to_string());
            }
        }
        for name in &joined_names {
            self.states.remove(name);
        }
        if let Some(queue) = self.queue.get() {
            queue.close();
        }

        *self.write_state() = PoolState::Stopped;
        tracing::info!(pool = %self.name, ?report, "Worker pool stopped");
        report
    }

    /// Hand this pool's queued work to `new_pool`, which must already be
    /// running, then stop this pool.
    pub fn replace(&self, new_pool: &WorkerPool) -> Result<ShutdownReport> {
        if new_pool.state() != PoolState::Running {
            bail!(PipelineError::Transfer(format!(
                "replacement pool {} is not running",
                new_pool.name
            )));
        }
        Ok(self.shutdown(Some(new_pool)))
    }

    /// Transfer `job` to the target, or defer it when there is none or the
    /// target refuses it.
    fn release(&self, job: Job, target: Option<&dyn TaskSink>, report: &mut ShutdownReport) {
        if let Some(target) = target {
            let label = job.item.label();
            // The target's outcomes are not routed back to this pool's caller.
            let handed = Job {
                collect: false,
                ..job.clone()
            };
            if target.add_job(handed) {
                report.transferred += 1;
                self.count(counters::TRANSFERRED);
                return;
            }
            tracing::warn!(pool = %self.name, item = %label, "Hand-off target refused job, deferring");
        }
        self.defer(job);
        report.deferred += 1;
    }

    fn defer(&self, job: Job) {
        let expects_outcome = job.expects_outcome();
        match job.item {
            WorkItem::File { path } => {
                tracing::debug!(pool = %self.name, item = %path, "Deferring unprocessed item");
                if expects_outcome {
                    let _ = self.outcome_tx.send((job.id, ProcessingResult::deferred()));
                }
            }
            WorkItem::Session(ticket) => match &self.registry {
                Some(registry) => registry.defer(&ticket),
                None => tracing::warn!(
                    pool = %self.name,
                    handler = %ticket.handler_key(),
                    "No registry to defer session with"
                ),
            },
        }
        self.count(counters::DEFERRED);
    }

    fn count(&self, counter: &str) {
        if let Err(e) = self.counters.apply(&StatDelta::incr(counter)) {
            tracing::error!(pool = %self.name, "Failed to record {counter}: {e:#}");
        }
    }

    /// Per-worker, per-slot state listing.
    pub fn worker_report(&self) -> String {
        self.states.report()
    }

    pub fn stats_report(&self) -> StatsReport {
        let uptime = self.started.get().map(Instant::elapsed).unwrap_or_default();
        StatsReport::new(uptime, self.counters.snapshot())
    }

    /// Sender feeding this pool's status listener, if it is running.
    pub fn status_sender(&self) -> Option<Sender<StatusMessage>> {
        self.lock_status().as_ref().map(StatusChannel::sender)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<Box<dyn WorkerHandle>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, Option<StatusChannel>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskSink for WorkerPool {
    fn add_job(&self, job: Job) -> bool {
        self.enqueue(job)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.state() == PoolState::Running {
            tracing::debug!(pool = %self.name, "Pool dropped while running, shutting down");
            self.shutdown(None);
        }
    }
}
