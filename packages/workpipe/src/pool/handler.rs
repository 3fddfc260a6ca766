//! What a worker slot does with a dequeued job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::protocol::WorkerEvent;
use super::uplink::Uplink;
use crate::error::{PipelineError, Stage};
use crate::pipeline::{FilePipeline, Job, ProcessingResult, WorkItem};
use crate::session::HandlerRegistry;
use crate::status::{StatDelta, delta::counters};

/// Per-slot context handed to handlers.
#[derive(Clone)]
pub struct HandlerContext {
    pub worker: String,
    pub slot: usize,
    uplink: Arc<dyn Uplink>,
}

impl HandlerContext {
    pub fn new(worker: impl Into<String>, slot: usize, uplink: Arc<dyn Uplink>) -> Self {
        Self {
            worker: worker.into(),
            slot,
            uplink,
        }
    }

    /// Report a counter increment to the parent's status listener.
    pub fn stat(&self, counter: &str, delta: i64) {
        self.uplink.emit(WorkerEvent::Stat(StatDelta::new(counter, delta)));
    }
}

/// Shared, per-worker job handler.
///
/// `setup` runs once before any slot starts and `teardown` once after the
/// last slot has exited.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Process one job. File jobs return their result; sessions return `None`.
    async fn handle(&self, job: Job, ctx: &HandlerContext) -> Result<Option<ProcessingResult>>;

    async fn teardown(&self) {}
}

/// Default handler: file jobs through a [`FilePipeline`] on the blocking
/// pool, sessions through the registry.
pub struct Dispatch {
    pipeline: Option<Arc<FilePipeline>>,
    registry: Arc<HandlerRegistry>,
}

impl Dispatch {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            pipeline: None,
            registry,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<FilePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Dispatch using the pipeline registered under `name`.
    pub fn for_pipeline(registry: Arc<HandlerRegistry>, name: &str) -> Result<Self> {
        let pipeline = registry.pipeline(name).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "unknown pipeline '{name}' (registered: {})",
                registry.pipeline_names().join(", ")
            ))
        })?;
        Ok(Self::new(registry).with_pipeline(pipeline))
    }
}

#[async_trait]
impl JobHandler for Dispatch {
    async fn handle(&self, job: Job, ctx: &HandlerContext) -> Result<Option<ProcessingResult>> {
        match job.item {
            WorkItem::File { path } => {
                let pipeline = self.pipeline.clone().ok_or_else(|| {
                    PipelineError::Configuration("no file pipeline configured for this worker".into())
                })?;
                let options = job.options;
                let result = tokio::task::spawn_blocking(move || pipeline.try_run(&path, &options))
                    .await
                    .context("Pipeline task panicked")??;
                Ok(Some(result))
            }
            WorkItem::Session(ticket) => {
                let label = WorkItem::Session(ticket.clone()).label();
                let factory = self.registry.session(&ticket.handler_key()).ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "no session handler registered as '{}'",
                        ticket.handler_key()
                    ))
                })?;
                let mut session = factory
                    .create(&ticket, self.registry.config())
                    .map_err(|e| PipelineError::item(&label, Stage::Session, &e))?;
                session
                    .handle_session()
                    .await
                    .map_err(|e| PipelineError::item(&label, Stage::Session, &e))?;
                ctx.stat(counters::SESSIONS, 1);
                Ok(None)
            }
        }
    }
}
