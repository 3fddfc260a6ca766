//! The single shared FIFO work queue.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::PipelineError;
use crate::pipeline::Envelope;

/// Bounded multi-producer multi-consumer queue of envelopes.
///
/// Clones share the same channel. Closing is a flag: consumers that find the
/// queue empty and closed stop asking for more.
#[derive(Clone)]
pub struct WorkQueue {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    capacity: usize,
    closed: Arc<AtomicBool>,
}

impl WorkQueue {
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Enqueue without blocking.
    pub fn try_push(&self, envelope: Envelope) -> Result<(), PipelineError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => PipelineError::Transfer("work queue is full".into()),
            TrySendError::Disconnected(_) => PipelineError::Transfer("work queue is disconnected".into()),
        })
    }

    /// Enqueue, waiting up to `timeout` for room. The envelope is handed back
    /// when it could not be enqueued.
    pub fn push_timeout(&self, envelope: Envelope, timeout: Duration) -> Result<(), Envelope> {
        self.tx.send_timeout(envelope, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(env) | SendTimeoutError::Disconnected(env) => env,
        })
    }

    /// Dequeue, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => Some(envelope),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Job, Options, WorkItem};

    fn task(id: u64) -> Envelope {
        Envelope::Task(Job::new(id, WorkItem::file(format!("{id}.txt")), Options::new()))
    }

    #[test]
    fn test_fifo_with_pills_after_work() {
        let queue = WorkQueue::bounded(4);
        queue.try_push(task(1)).unwrap();
        queue.try_push(task(2)).unwrap();
        queue.try_push(Envelope::Pill).unwrap();

        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), Some(task(1)));
        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), Some(task(2)));
        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), Some(Envelope::Pill));
        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_full_queue_hands_envelope_back() {
        let queue = WorkQueue::bounded(1);
        queue.try_push(task(1)).unwrap();
        assert!(matches!(queue.try_push(task(2)), Err(PipelineError::Transfer(_))));
        assert_eq!(
            queue.push_timeout(task(3), Duration::from_millis(10)),
            Err(task(3))
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_close_flag_is_shared() {
        let queue = WorkQueue::bounded(0);
        assert_eq!(queue.capacity(), 1);
        let clone = queue.clone();
        queue.close();
        assert!(clone.is_closed());
    }
}
