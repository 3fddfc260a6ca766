//! Where workers send events: straight into parent channels for thread
//! workers, or as JSON lines on stdout for worker processes.

use crossbeam::channel::Sender;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::ipc::{LineWriter, is_broken_pipe};
use super::protocol::{ChildMessage, WorkerEvent, to_line};
use crate::pipeline::ProcessingResult;
use crate::status::StatusMessage;

/// Best-effort event sink. Failures are logged, never raised.
pub trait Uplink: Send + Sync {
    fn emit(&self, event: WorkerEvent);
}

/// Parent-side routing: outcomes to the pool's collector, everything else to
/// the status listener.
#[derive(Clone)]
pub struct LocalUplink {
    status: Sender<StatusMessage>,
    outcomes: Sender<(u64, ProcessingResult)>,
}

impl LocalUplink {
    pub fn new(status: Sender<StatusMessage>, outcomes: Sender<(u64, ProcessingResult)>) -> Self {
        Self { status, outcomes }
    }
}

impl Uplink for LocalUplink {
    fn emit(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Outcome { job, result } => {
                if self.outcomes.send((job, result)).is_err() {
                    tracing::debug!(job, "Outcome receiver gone, dropping result");
                }
            }
            other => {
                if self.status.send(StatusMessage::Event(other)).is_err() {
                    tracing::debug!("Status listener gone, dropping event");
                }
            }
        }
    }
}

/// Child-side: events become `event` lines on stdout.
pub struct PipeUplink<W: Write + Send> {
    writer: Arc<Mutex<LineWriter<W>>>,
    parent_gone: AtomicBool,
}

impl<W: Write + Send> PipeUplink<W> {
    pub fn new(writer: Arc<Mutex<LineWriter<W>>>) -> Self {
        Self {
            writer,
            parent_gone: AtomicBool::new(false),
        }
    }

    pub fn send(&self, message: &ChildMessage) {
        if self.parent_gone.load(Ordering::Relaxed) {
            return;
        }
        let line = match to_line(message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode worker message: {e}");
                return;
            }
        };
        let Ok(mut writer) = self.writer.lock() else {
            tracing::error!("Worker stdout lock poisoned");
            return;
        };
        if let Err(e) = writer.write_line(&line) {
            if is_broken_pipe(&e) {
                tracing::debug!("Parent closed the pipe, suppressing further events");
                self.parent_gone.store(true, Ordering::Relaxed);
            } else {
                tracing::warn!("Failed to send worker event: {e}");
            }
        }
    }
}

impl<W: Write + Send> Uplink for PipeUplink<W> {
    fn emit(&self, event: WorkerEvent) {
        self.send(&ChildMessage::Event { event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::protocol::from_line;
    use crate::status::StatDelta;
    use crossbeam::channel;
    use std::io;

    #[test]
    fn test_local_uplink_routes_by_kind() {
        let (status_tx, status_rx) = channel::unbounded();
        let (outcome_tx, outcome_rx) = channel::unbounded();
        let uplink = LocalUplink::new(status_tx, outcome_tx);

        uplink.emit(WorkerEvent::Outcome {
            job: 9,
            result: ProcessingResult::deferred(),
        });
        uplink.emit(WorkerEvent::Stat(StatDelta::incr("x")));

        let (job, result) = outcome_rx.try_recv().unwrap();
        assert_eq!(job, 9);
        assert!(result.is_deferred());
        assert!(matches!(
            status_rx.try_recv().unwrap(),
            StatusMessage::Event(WorkerEvent::Stat(_))
        ));
        assert!(outcome_rx.try_recv().is_err());
    }

    #[test]
    fn test_pipe_uplink_writes_event_lines() {
        let writer = Arc::new(Mutex::new(LineWriter::new(Vec::new())));
        let uplink = PipeUplink::new(writer.clone());
        uplink.emit(WorkerEvent::Stat(StatDelta::new("y", 2)));

        let guard = writer.lock().unwrap();
        let text = String::from_utf8(guard.get_ref().clone()).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(
            from_line::<ChildMessage>(&text).unwrap(),
            ChildMessage::Event {
                event: WorkerEvent::Stat(StatDelta::new("y", 2))
            }
        );
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn test_broken_pipe_is_tolerated() {
        let uplink = PipeUplink::new(Arc::new(Mutex::new(LineWriter::new(ClosedPipe))));
        uplink.emit(WorkerEvent::Stat(StatDelta::incr("z")));
        assert!(uplink.parent_gone.load(Ordering::Relaxed));
        uplink.emit(WorkerEvent::Stat(StatDelta::incr("z")));
    }
}
