//! Where worker slots pull their next envelope from.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::ipc::{LineReader, LineWriter};
use super::protocol::{ChildMessage, ParentMessage, from_line, to_line};
use super::queue::WorkQueue;
use crate::error::PipelineError;
use crate::pipeline::{Envelope, Job};

/// Answer to one fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Task(Job),
    Pill,
    /// Nothing within the poll interval
    Idle,
    /// The queue is closed; stop fetching
    Closed,
}

impl From<ParentMessage> for Fetched {
    fn from(message: ParentMessage) -> Self {
        match message {
            ParentMessage::Task { job } => Fetched::Task(job),
            ParentMessage::Pill => Fetched::Pill,
            ParentMessage::Idle => Fetched::Idle,
            ParentMessage::Closed => Fetched::Closed,
        }
    }
}

/// Blocking dequeue; slots call it from the blocking thread pool.
pub trait TaskSource: Send + Sync {
    fn fetch(&self, timeout: Duration) -> Result<Fetched>;

    /// Return a job that was fetched but never started. Sources that cannot
    /// take work back refuse, and the caller defers the job instead.
    fn give_back(&self, job: Job) -> Result<()> {
        Err(PipelineError::Worker(format!("cannot return job {} to this source", job.id)).into())
    }
}

/// Dequeue straight from the shared queue (thread workers, and the parent
/// side feeding process workers).
pub struct QueueSource {
    queue: WorkQueue,
}

impl QueueSource {
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }
}

impl TaskSource for QueueSource {
    fn fetch(&self, timeout: Duration) -> Result<Fetched> {
        Ok(match self.queue.recv_timeout(timeout) {
            Some(Envelope::Task(job)) => Fetched::Task(job),
            Some(Envelope::Pill) => Fetched::Pill,
            None if self.queue.is_closed() => Fetched::Closed,
            None => Fetched::Idle,
        })
    }

    fn give_back(&self, job: Job) -> Result<()> {
        if self.queue.is_closed() {
            return Err(PipelineError::Transfer("work queue is closed".into()).into());
        }
        self.queue.try_push(Envelope::Task(job))?;
        Ok(())
    }
}

/// Fetch over the worker's pipes: write `fetch`, read the parent's answer.
///
/// The reader lock is held for the whole request/answer exchange so answers
/// are matched to requests one to one.
pub struct PipeSource<R: Read + Send, W: Write + Send> {
    reader: Mutex<LineReader<R>>,
    writer: Arc<Mutex<LineWriter<W>>>,
}

impl<R: Read + Send, W: Write + Send> PipeSource<R, W> {
    pub fn new(reader: LineReader<R>, writer: Arc<Mutex<LineWriter<W>>>) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer,
        }
    }
}

impl<R: Read + Send, W: Write + Send> TaskSource for PipeSource<R, W> {
    fn fetch(&self, _timeout: Duration) -> Result<Fetched> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| PipelineError::Ipc("reader lock poisoned".into()))?;

        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| PipelineError::Ipc("writer lock poisoned".into()))?;
            writer
                .write_line(&to_line(&ChildMessage::Fetch)?)
                .context("Failed to request work from parent")?;
        }

        match reader.read_line().context("Failed to read from parent")? {
            Some(line) => {
                let message: ParentMessage = from_line(line)
                    .map_err(|e| PipelineError::Ipc(format!("invalid parent message: {e}")))?;
                Ok(message.into())
            }
            // parent closed our stdin
            None => Ok(Fetched::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Options, WorkItem};
    use std::io::Cursor;

    #[test]
    fn test_queue_source_maps_envelopes() {
        let queue = WorkQueue::bounded(4);
        let job = Job::new(1, WorkItem::file("a"), Options::new());
        queue.try_push(Envelope::Task(job.clone())).unwrap();
        queue.try_push(Envelope::Pill).unwrap();

        let source = QueueSource::new(queue.clone());
        let poll = Duration::from_millis(10);
        assert_eq!(source.fetch(poll).unwrap(), Fetched::Task(job));
        assert_eq!(source.fetch(poll).unwrap(), Fetched::Pill);
        assert_eq!(source.fetch(poll).unwrap(), Fetched::Idle);
        queue.close();
        assert_eq!(source.fetch(poll).unwrap(), Fetched::Closed);
    }

    #[test]
    fn test_give_back_requeues_until_closed() {
        let queue = WorkQueue::bounded(2);
        let source = QueueSource::new(queue.clone());
        let job = Job::new(4, WorkItem::file("late"), Options::new());

        source.give_back(job.clone()).unwrap();
        assert_eq!(queue.len(), 1);

        queue.close();
        assert!(source.give_back(job).is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pipe_source_requests_then_reads_answer() {
        let answers = [
            to_line(&ParentMessage::Idle).unwrap(),
            to_line(&ParentMessage::Pill).unwrap(),
        ]
        .concat();
        let writer = Arc::new(Mutex::new(LineWriter::new(Vec::new())));
        let source = PipeSource::new(LineReader::new(Cursor::new(answers)), writer.clone());

        let poll = Duration::from_millis(10);
        assert_eq!(source.fetch(poll).unwrap(), Fetched::Idle);
        assert_eq!(source.fetch(poll).unwrap(), Fetched::Pill);
        // EOF on stdin
        assert_eq!(source.fetch(poll).unwrap(), Fetched::Closed);
        assert!(source.give_back(Job::new(1, WorkItem::file("a"), Options::new())).is_err());
    }
}
