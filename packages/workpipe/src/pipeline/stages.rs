//! Stage traits and the per-item file pipeline
//!
//! Every stage is a trait with a blanket implementation for plain closures,
//! so simple pipelines can be assembled without defining types:
//!
//! ```rust
//! use workpipe::pipeline::{FilePipeline, Options};
//!
//! let pipeline = FilePipeline::in_memory()
//!     .with_process(|data: Vec<u8>, _opts: &Options| -> anyhow::Result<Vec<u8>> {
//!         Ok(data.to_ascii_uppercase())
//!     });
//! assert_eq!(pipeline.pre_stage_count(), 0);
//! ```

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::item::{Options, merge_options};
use super::outname::outname_create;
use super::result::{Metadata, ProcessingResult};
use crate::error::{PipelineError, Stage, panic_message};

/// Data plus extra options produced by a pre-process stage.
pub type PreOutput = (Option<Vec<u8>>, Options);
/// Data plus extra metadata produced by a post-process stage.
pub type PostOutput = (Option<Vec<u8>>, Metadata);

/// Per-item input acquisition and output persistence.
pub trait FileIo: Send + Sync {
    fn read(&self, name: &str, options: &Options) -> Result<Vec<u8>>;

    /// Persist `data` under `name` and return the name actually written.
    fn write(&self, data: &[u8], name: &str, options: &Options) -> Result<String>;
}

/// Filter/control stage. Returning `None` drops the item; the extra options
/// are merged into the options seen by the following stages.
pub trait PreProcess: Send + Sync {
    fn pre_process(&self, data: Vec<u8>, options: &Options) -> Result<PreOutput>;
}

impl<F> PreProcess for F
where
    F: Fn(Vec<u8>, &Options) -> Result<PreOutput> + Send + Sync,
{
    fn pre_process(&self, data: Vec<u8>, options: &Options) -> Result<PreOutput> {
        self(data, options)
    }
}

/// The transformation proper.
pub trait Transform: Send + Sync {
    fn process(&self, data: Vec<u8>, options: &Options) -> Result<Vec<u8>>;
}

impl<F> Transform for F
where
    F: Fn(Vec<u8>, &Options) -> Result<Vec<u8>> + Send + Sync,
{
    fn process(&self, data: Vec<u8>, options: &Options) -> Result<Vec<u8>> {
        self(data, options)
    }
}

/// Metadata stage. Returning `None` skips writing the output.
pub trait PostProcess: Send + Sync {
    fn post_process(
        &self,
        data: Vec<u8>,
        meta: &Metadata,
        options: &Options,
    ) -> Result<PostOutput>;
}

impl<F> PostProcess for F
where
    F: Fn(Vec<u8>, &Metadata, &Options) -> Result<PostOutput> + Send + Sync,
{
    fn post_process(
        &self,
        data: Vec<u8>,
        meta: &Metadata,
        options: &Options,
    ) -> Result<PostOutput> {
        self(data, meta, options)
    }
}

/// Output naming.
pub trait OutName: Send + Sync {
    fn outname(&self, input: &str, data: &[u8], meta: &Metadata, options: &Options) -> Result<String>;
}

impl<F> OutName for F
where
    F: Fn(&str, &[u8], &Metadata, &Options) -> Result<String> + Send + Sync,
{
    fn outname(&self, input: &str, data: &[u8], meta: &Metadata, options: &Options) -> Result<String> {
        self(input, data, meta, options)
    }
}

struct Identity;

impl Transform for Identity {
    fn process(&self, data: Vec<u8>, _options: &Options) -> Result<Vec<u8>> {
        Ok(data)
    }
}

struct DefaultOutName;

impl OutName for DefaultOutName {
    fn outname(&self, input: &str, data: &[u8], meta: &Metadata, options: &Options) -> Result<String> {
        Ok(outname_create(input, data, meta, options)?)
    }
}

/// Local filesystem I/O.
pub struct FsIo;

impl FileIo for FsIo {
    fn read(&self, name: &str, _options: &Options) -> Result<Vec<u8>> {
        std::fs::read(name).with_context(|| format!("Failed to read {name}"))
    }

    fn write(&self, data: &[u8], name: &str, _options: &Options) -> Result<String> {
        std::fs::write(name, data).with_context(|| format!("Failed to write {name}"))?;
        Ok(name.to_string())
    }
}

/// In-memory I/O for embedding and tests: reads come from a seeded map,
/// writes are recorded.
#[derive(Default, Clone)]
pub struct MemoryIo {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(name.into(), data.into());
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().ok().and_then(|files| files.get(name).cloned())
    }
}

impl FileIo for MemoryIo {
    fn read(&self, name: &str, _options: &Options) -> Result<Vec<u8>> {
        self.get(name)
            .ok_or_else(|| anyhow::anyhow!("No such in-memory file: {name}"))
    }

    fn write(&self, data: &[u8], name: &str, _options: &Options) -> Result<String> {
        self.insert(name, data.to_vec());
        Ok(name.to_string())
    }
}

/// The fixed per-item chain: read, pre-process, process, post-process, name,
/// write.
pub struct FilePipeline {
    io: Box<dyn FileIo>,
    pre: Vec<Box<dyn PreProcess>>,
    transform: Box<dyn Transform>,
    post: Vec<Box<dyn PostProcess>>,
    outname: Box<dyn OutName>,
}

impl FilePipeline {
    pub fn new(io: impl FileIo + 'static) -> Self {
        Self {
            io: Box::new(io),
            pre: Vec::new(),
            transform: Box::new(Identity),
            post: Vec::new(),
            outname: Box::new(DefaultOutName),
        }
    }

    /// Filesystem-backed pipeline.
    pub fn filesystem() -> Self {
        Self::new(FsIo)
    }

    /// Pipeline over a fresh, empty [`MemoryIo`].
    pub fn in_memory() -> Self {
        Self::new(MemoryIo::new())
    }

    pub fn with_pre(mut self, stage: impl PreProcess + 'static) -> Self {
        self.pre.push(Box::new(stage));
        self
    }

    pub fn with_process(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn with_post(mut self, stage: impl PostProcess + 'static) -> Self {
        self.post.push(Box::new(stage));
        self
    }

    pub fn with_outname(mut self, outname: impl OutName + 'static) -> Self {
        self.outname = Box::new(outname);
        self
    }

    pub fn pre_stage_count(&self) -> usize {
        self.pre.len()
    }

    /// Run one item, reporting the failing stage on error. A panicking stage
    /// is reported like a failing one.
    pub fn try_run(&self, input: &str, options: &Options) -> Result<ProcessingResult, PipelineError> {
        let mut data = guarded(input, Stage::Read, || self.io.read(input, options))?;
        let mut options = options.clone();

        for stage in &self.pre {
            let (next, extra) = guarded(input, Stage::PreProcess, || stage.pre_process(data, &options))?;
            match next {
                Some(next) => data = next,
                None => return Ok(ProcessingResult::dropped(Metadata::new())),
            }
            options = merge_options(&options, &extra);
        }

        let mut data = guarded(input, Stage::Process, || self.transform.process(data, &options))?;

        let mut meta = Metadata::new();
        for stage in &self.post {
            let (next, extra) = guarded(input, Stage::PostProcess, || stage.post_process(data, &meta, &options))?;
            ProcessingResult::merge_meta(&mut meta, extra);
            match next {
                Some(next) => data = next,
                None => return Ok(ProcessingResult::dropped(meta)),
            }
        }

        let name = guarded(input, Stage::OutName, || {
            self.outname.outname(input, &data, &meta, &options)
        })?;
        let written = guarded(input, Stage::Write, || self.io.write(&data, &name, &options))?;

        Ok(ProcessingResult::written(written, meta))
    }

    /// Run one item; failures are logged and become a dropped result.
    pub fn run(&self, input: &str, options: &Options) -> ProcessingResult {
        match self.try_run(input, options) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    item = input,
                    stage = ?err.stage().map(|s| s.to_string()),
                    error = %err,
                    "Item processing failed"
                );
                ProcessingResult::dropped(Metadata::new())
            }
        }
    }
}

/// Call one stage, turning its error or panic into an item failure.
fn guarded<T>(input: &str, stage: Stage, call: impl FnOnce() -> Result<T>) -> Result<T, PipelineError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(|err| PipelineError::item(input, stage, &err)),
        Err(payload) => {
            let err = anyhow::anyhow!("stage panicked: {}", panic_message(payload.as_ref()));
            Err(PipelineError::item(input, stage, &err))
        }
    }
}
