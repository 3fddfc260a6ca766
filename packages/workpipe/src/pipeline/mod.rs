//! File pipelines: the per-item stage chain, output naming, results and the
//! batch driver.

pub mod builtin;
pub mod driver;
pub mod item;
pub mod outname;
pub mod result;
pub mod stages;

pub use self::driver::{PipelineDriver, RunRequest};
pub use self::item::{Envelope, Job, Options, SessionTicket, WorkItem, merge_options};
pub use self::outname::outname_create;
pub use self::result::{Metadata, ProcessingResult, prune_results};
pub use self::stages::{
    FileIo, FilePipeline, FsIo, MemoryIo, OutName, PostOutput, PostProcess, PreOutput, PreProcess,
    Transform,
};
