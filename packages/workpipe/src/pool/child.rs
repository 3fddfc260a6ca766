//! Entry point of a worker process (the hidden `worker` subcommand).

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::handler::Dispatch;
use super::ipc::{LineReader, LineWriter};
use super::protocol::ChildMessage;
use super::source::PipeSource;
use super::uplink::PipeUplink;
use super::worker::WorkerRuntime;
use crate::session::HandlerRegistry;

/// Settings a worker process is started with.
#[derive(Debug, Clone)]
pub struct ChildOptions {
    pub name: String,
    pub coroutines: usize,
    pub pipeline: String,
    pub poll: Duration,
}

/// Serve the parent over stdin/stdout until every slot has exited.
pub fn run_worker_main(options: ChildOptions, registry: HandlerRegistry) -> Result<()> {
    let registry = Arc::new(registry);
    let dispatch = Dispatch::for_pipeline(registry, &options.pipeline)?;

    let writer = Arc::new(Mutex::new(LineWriter::new(std::io::stdout())));
    let uplink = Arc::new(PipeUplink::new(writer.clone()));
    let source = Arc::new(PipeSource::new(LineReader::new(std::io::stdin()), writer));

    uplink.send(&ChildMessage::Ready {
        worker: options.name.clone(),
        pid: std::process::id(),
    });

    WorkerRuntime::new(&options.name, source, uplink, Arc::new(dispatch))
        .with_coroutines(options.coroutines)
        .with_poll(options.poll)
        .with_signals()
        .run()
}
