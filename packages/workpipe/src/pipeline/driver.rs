//! Batch driver: size a run, then process every item inline or on a pool.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::item::{Options, merge_options};
use super::result::ProcessingResult;
use super::stages::FilePipeline;
use crate::config::{BackendKind, PipeConfig, Settings};
use crate::parallel::{ExecutionStrategy, SequentialExecutor, WorkerBudget};
use crate::pool::{Backend, Dispatch, ProcessSpec, WorkerPool};
use crate::session::HandlerRegistry;

/// Per-call sizing limits and option overrides. Unset fields fall back to the
/// driver's `[pipeline]` settings.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub workers: Option<usize>,
    pub available_memory: Option<u64>,
    pub memory_fraction: Option<f64>,
    pub per_item_memory: Option<u64>,
    /// Options that win over the driver's construction-time options
    pub overrides: Options,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_available_memory(mut self, bytes: u64) -> Self {
        self.available_memory = Some(bytes);
        self
    }

    pub fn with_per_item_memory(mut self, bytes: u64) -> Self {
        self.per_item_memory = Some(bytes);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

/// A named pipeline bound to its default options and performance settings.
pub struct PipelineDriver {
    name: String,
    stages: Arc<FilePipeline>,
    defaults: Options,
    settings: Settings,
    registry: Arc<HandlerRegistry>,
    process: Option<ProcessSpec>,
    pool_constructed: Arc<AtomicBool>,
}

impl PipelineDriver {
    /// Driver running `stages` on thread workers inside this process.
    pub fn new(name: impl Into<String>, stages: FilePipeline, registry: Arc<HandlerRegistry>) -> Self {
        let mut settings = Settings::default();
        settings.performance.backend = BackendKind::Thread;
        Self {
            name: name.into(),
            stages: Arc::new(stages),
            defaults: Options::new(),
            settings,
            registry,
            process: None,
            pool_constructed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Driver for the pipeline registered as `name`, configured from
    /// `config` (backend, sizing and `[pipeline]` options).
    pub fn from_config(name: &str, registry: Arc<HandlerRegistry>, config: &PipeConfig) -> Result<Self> {
        let stages = registry.pipeline(name).with_context(|| {
            format!(
                "Unknown pipeline '{name}' (registered: {})",
                registry.pipeline_names().join(", ")
            )
        })?;
        let settings = config.settings()?;
        let process = ProcessSpec::new(name).with_config(config.source().map(|p| p.to_path_buf()));

        Ok(Self {
            name: name.to_string(),
            stages,
            defaults: settings.pipeline.stage_options(),
            settings,
            registry,
            process: Some(process),
            pool_constructed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Construction-time options; call-time overrides win.
    pub fn with_options(mut self, options: Options) -> Self {
        self.defaults = options;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Launch process workers with `spec` when the backend is `process`.
    pub fn with_process(mut self, spec: ProcessSpec) -> Self {
        self.process = Some(spec);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Options {
        &self.defaults
    }

    /// Set once a worker pool has been built for this driver.
    pub fn pool_constructed(&self) -> bool {
        self.pool_constructed.load(Ordering::SeqCst)
    }

    /// Worker budget for `item_count` items under `request`.
    pub fn plan(&self, item_count: usize, request: &RunRequest) -> Result<ExecutionStrategy> {
        let pipeline = &self.settings.pipeline;
        let workers = WorkerBudget::new()
            .with_items(item_count)
            .with_max_workers(request.workers.or(pipeline.max_workers))
            .with_available_memory(request.available_memory)
            .with_memory_fraction(request.memory_fraction.unwrap_or(pipeline.memory_fraction))
            .with_per_item_memory(request.per_item_memory.or(pipeline.per_item_memory))
            .compute()?;
        Ok(ExecutionStrategy::for_budget(workers))
    }

    /// Process `items` and return one result per item, in submission order.
    pub fn run(&self, items: &[String], request: &RunRequest) -> Result<Vec<ProcessingResult>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let options = merge_options(&self.defaults, &request.overrides);

        match self.plan(items.len(), request)? {
            ExecutionStrategy::Inline => {
                tracing::debug!(pipeline = %self.name, items = items.len(), "Running inline");
                Ok(SequentialExecutor::execute(
                    items,
                    |path: &String| self.stages.run(path, &options),
                    None::<fn(usize, usize)>,
                ))
            }
            ExecutionStrategy::Pool { workers } => {
                let pool = self.build_pool();
                pool.start(workers)?;
                let results = pool.map(items, &options);
                let report = pool.shutdown(None);
                tracing::debug!(pipeline = %self.name, ?report, "Pool run finished");
                Ok(results)
            }
        }
    }

    fn build_pool(&self) -> WorkerPool {
        self.pool_constructed.store(true, Ordering::SeqCst);

        let performance = self.settings.performance.clone();
        let backend = match (performance.backend, &self.process) {
            (BackendKind::Process, Some(spec)) => Backend::Process(spec.clone()),
            (BackendKind::Process, None) => {
                tracing::debug!(pipeline = %self.name, "No worker executable configured, using thread workers");
                self.thread_backend()
            }
            (BackendKind::Thread, _) => self.thread_backend(),
        };
        WorkerPool::new(self.name.clone(), backend, performance).with_registry(self.registry.clone())
    }

    fn thread_backend(&self) -> Backend {
        let dispatch = Dispatch::new(self.registry.clone()).with_pipeline(self.stages.clone());
        Backend::Thread {
            handler: Arc::new(dispatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLookup;
    use crate::pipeline::{MemoryIo, Metadata};
    use serde_json::json;

    struct NoConfig;

    impl ConfigLookup for NoConfig {
        fn get_int(&self, _: &str, _: &str) -> Option<i64> {
            None
        }
        fn get_bool(&self, _: &str, _: &str) -> Option<bool> {
            None
        }
        fn get_str(&self, _: &str, _: &str) -> Option<String> {
            None
        }
    }

    fn registry() -> Arc<HandlerRegistry> {
        Arc::new(HandlerRegistry::new(Arc::new(NoConfig)))
    }

    #[test]
    fn test_empty_input_is_a_no_op() {
        let driver = PipelineDriver::new("noop", FilePipeline::in_memory(), registry());
        let results = driver.run(&[], &RunRequest::new().with_workers(4)).unwrap();
        assert!(results.is_empty());
        assert!(!driver.pool_constructed());
    }

    #[test]
    fn test_zero_workers_is_resource_exhausted() {
        let driver = PipelineDriver::new("none", FilePipeline::in_memory(), registry());
        let request = RunRequest::new()
            .with_workers(4)
            .with_available_memory(10)
            .with_per_item_memory(100);
        let err = driver.run(&["a".into()], &request).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::PipelineError>(),
            Some(crate::error::PipelineError::ResourceExhausted { memory_cap: 0, .. })
        ));
    }

    #[test]
    fn test_pool_run_keeps_order() {
        let io = MemoryIo::new();
        let items: Vec<String> = (0..8).map(|i| format!("in/{i}.txt")).collect();
        for (i, item) in items.iter().enumerate() {
            io.insert(item.as_str(), format!("item {i}"));
        }

        let stages = FilePipeline::new(io.clone()).with_post(
            |data: Vec<u8>, _meta: &Metadata, _opts: &Options| -> Result<crate::pipeline::PostOutput> {
                let mut meta = Metadata::new();
                meta.insert("len".into(), json!(data.len()));
                Ok((Some(data), meta))
            },
        );
        let driver = PipelineDriver::new("order", stages, registry())
            .with_options(Options::from_iter([("outname_append".to_string(), json!("_o"))]));

        let results = driver.run(&items, &RunRequest::new().with_workers(3)).unwrap();
        assert!(driver.pool_constructed());
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.output.as_deref(), Some(format!("in/{i}_o.txt").as_str()));
            assert_eq!(result.meta["len"], json!(6));
        }
        assert_eq!(io.get("in/5_o.txt").unwrap(), b"item 5");
    }
}
