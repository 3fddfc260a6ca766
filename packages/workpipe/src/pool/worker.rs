//! Worker runtime: one single-threaded scheduler running N cooperative slots.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::handler::JobHandler;
use super::protocol::WorkerEvent;
use super::slot::Slot;
use super::source::TaskSource;
use super::state::WorkerState;
use super::uplink::Uplink;

/// Default number of slots per worker.
pub const DEFAULT_COROUTINES: usize = 5;

const DEFAULT_POLL: Duration = Duration::from_millis(250);
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

pub struct WorkerRuntime {
    name: String,
    coroutines: usize,
    poll: Duration,
    source: Arc<dyn TaskSource>,
    uplink: Arc<dyn Uplink>,
    handler: Arc<dyn JobHandler>,
    cancel: CancellationToken,
    handle_signals: bool,
}

impl WorkerRuntime {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn TaskSource>,
        uplink: Arc<dyn Uplink>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            coroutines: DEFAULT_COROUTINES,
            poll: DEFAULT_POLL,
            source,
            uplink,
            handler,
            cancel: CancellationToken::new(),
            handle_signals: false,
        }
    }

    pub fn with_coroutines(mut self, coroutines: usize) -> Self {
        self.coroutines = coroutines.max(1);
        self
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ignore SIGHUP and turn SIGTERM/SIGINT into cancellation. Only for
    /// dedicated worker processes.
    pub fn with_signals(mut self) -> Self {
        self.handle_signals = true;
        self
    }

    /// Build the scheduler and block until every slot has exited.
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name(format!("{}-blocking", self.name))
            .build()
            .context("Failed to build worker runtime")?;

        let result = runtime.block_on(self.run_slots());
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
        result
    }

    async fn run_slots(self) -> Result<()> {
        if self.handle_signals {
            install_signal_handlers(self.cancel.clone())?;
        }

        if let Err(e) = self.handler.setup().await {
            for index in 0..self.coroutines {
                self.uplink
                    .emit(WorkerEvent::state(&self.name, index, WorkerState::Crashed));
            }
            return Err(e.context(format!("Worker {} setup failed", self.name)));
        }

        tracing::info!(worker = %self.name, coroutines = self.coroutines, "Worker started");

        let mut slots = JoinSet::new();
        for index in 0..self.coroutines {
            self.uplink
                .emit(WorkerEvent::state(&self.name, index, WorkerState::Created));
            let slot = Slot {
                worker: self.name.clone(),
                index,
                source: self.source.clone(),
                uplink: self.uplink.clone(),
                handler: self.handler.clone(),
                cancel: self.cancel.clone(),
                poll: self.poll,
            };
            let uplink = self.uplink.clone();
            let worker = self.name.clone();
            slots.spawn(async move {
                if let Err(e) = tokio::spawn(slot.run()).await
                    && e.is_panic()
                {
                    tracing::error!(worker = %worker, slot = index, "Slot panicked");
                    uplink.emit(WorkerEvent::state(&worker, index, WorkerState::Crashed));
                }
            });
        }

        while slots.join_next().await.is_some() {}

        self.handler.teardown().await;
        tracing::info!(worker = %self.name, "Worker stopped");
        Ok(())
    }
}

fn install_signal_handlers(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut hup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = term.recv() => {
                    tracing::info!("Received SIGTERM, cancelling slots");
                    cancel.cancel();
                }
                _ = int.recv() => {
                    tracing::info!("Received SIGINT, cancelling slots");
                    cancel.cancel();
                }
                _ = hup.recv() => tracing::debug!("Ignoring SIGHUP"),
                _ = cancel.cancelled() => break,
            }
        }
    });
    Ok(())
}
