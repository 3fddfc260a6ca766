//! Parent-side worker handles and the join/terminate/kill escalation.

use anyhow::Result;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::proc::WorkerProc;

const JOIN_POLL: Duration = Duration::from_millis(10);

pub trait WorkerHandle: Send {
    fn name(&self) -> &str;

    fn is_finished(&mut self) -> bool;

    /// Polite stop request.
    fn terminate(&mut self) -> Result<()>;

    /// Forced stop.
    fn kill(&mut self) -> Result<()>;

    /// Release resources of a finished worker.
    fn reap(&mut self);
}

/// Worker running on a dedicated thread with its own scheduler.
pub struct ThreadWorker {
    name: String,
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ThreadWorker {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
            cancel,
        }
    }
}

impl WorkerHandle for ThreadWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_finished(&mut self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    fn terminate(&mut self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    /// Threads cannot be killed; the handle is detached instead.
    fn kill(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take()
            && !handle.is_finished()
        {
            tracing::error!(worker = %self.name, "Worker thread ignored cancellation, detaching it");
        }
        Ok(())
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take_if(|h| h.is_finished())
            && handle.join().is_err()
        {
            tracing::error!(worker = %self.name, "Worker thread panicked");
        }
    }
}

/// Worker process plus the parent-side threads bridging its pipes.
pub struct ProcessWorker {
    proc: WorkerProc,
    bridge: Vec<JoinHandle<()>>,
}

impl ProcessWorker {
    pub fn new(proc: WorkerProc, bridge: Vec<JoinHandle<()>>) -> Self {
        Self { proc, bridge }
    }

    pub fn pid(&self) -> u32 {
        self.proc.pid()
    }
}

impl WorkerHandle for ProcessWorker {
    fn name(&self) -> &str {
        self.proc.name()
    }

    fn is_finished(&mut self) -> bool {
        self.proc.has_exited()
    }

    fn terminate(&mut self) -> Result<()> {
        self.proc.terminate()
    }

    fn kill(&mut self) -> Result<()> {
        self.proc.kill()
    }

    fn reap(&mut self) {
        if !self.proc.has_exited() {
            return;
        }
        if let Some(status) = self.proc.exit_status()
            && !status.success()
        {
            tracing::warn!(worker = %self.proc.name(), %status, "Worker process exited abnormally");
        }
        for thread in self.bridge.drain(..) {
            if thread.join().is_err() {
                tracing::error!(worker = %self.proc.name(), "Pipe bridge thread panicked");
            }
        }
    }
}

/// Outcome of [`join_with_escalation`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    /// Workers that stopped on their own within the timeout
    pub joined: usize,
    /// Workers that had to be sent a termination request
    pub terminated: usize,
    /// Workers still running after the grace period and killed
    pub killed: usize,
}

/// Wait up to `timeout` for every worker; terminate stragglers, wait `grace`,
/// then kill whatever is left.
pub fn join_with_escalation(
    workers: &mut [Box<dyn WorkerHandle>],
    timeout: Duration,
    grace: Duration,
) -> JoinSummary {
    let mut summary = JoinSummary::default();
    let all: Vec<usize> = (0..workers.len()).collect();

    let pending = wait_for(workers, &all, timeout);
    summary.joined = workers.len() - pending.len();

    if !pending.is_empty() {
        for &index in &pending {
            let worker = &mut workers[index];
            tracing::warn!(worker = %worker.name(), ?timeout, "Worker did not stop in time, terminating");
            if let Err(e) = worker.terminate() {
                tracing::error!(worker = %worker.name(), "Failed to terminate worker: {e:#}");
            }
            summary.terminated += 1;
        }

        for index in wait_for(workers, &pending, grace) {
            let worker = &mut workers[index];
            tracing::error!(worker = %worker.name(), "Worker ignored termination, killing");
            if let Err(e) = worker.kill() {
                tracing::error!(worker = %worker.name(), "Failed to kill worker: {e:#}");
            }
            summary.killed += 1;
        }
    }

    for worker in workers.iter_mut() {
        worker.reap();
    }
    summary
}

/// Indices from `indices` still running once `timeout` has elapsed.
fn wait_for(workers: &mut [Box<dyn WorkerHandle>], indices: &[usize], timeout: Duration) -> Vec<usize> {
    let deadline = Instant::now() + timeout;
    loop {
        let running: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| !workers[i].is_finished())
            .collect();
        if running.is_empty() || Instant::now() >= deadline {
            return running;
        }
        std::thread::sleep(JOIN_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scripted handle: finishes after `terminate` only when `obeys` is set.
    struct Scripted {
        name: String,
        finished: Arc<AtomicBool>,
        obeys: bool,
        killed: bool,
    }

    impl Scripted {
        fn boxed(name: &str, finished: bool, obeys: bool) -> Box<dyn WorkerHandle> {
            Box::new(Self {
                name: name.into(),
                finished: Arc::new(AtomicBool::new(finished)),
                obeys,
                killed: false,
            })
        }
    }

    impl WorkerHandle for Scripted {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_finished(&mut self) -> bool {
            self.killed || self.finished.load(Ordering::SeqCst)
        }
        fn terminate(&mut self) -> Result<()> {
            if self.obeys {
                self.finished.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
        fn kill(&mut self) -> Result<()> {
            self.killed = true;
            Ok(())
        }
        fn reap(&mut self) {}
    }

    #[test]
    fn test_escalation_levels() {
        let mut workers = vec![
            Scripted::boxed("done", true, true),
            Scripted::boxed("polite", false, true),
            Scripted::boxed("stubborn", false, false),
        ];
        let summary = join_with_escalation(&mut workers, Duration::from_millis(30), Duration::from_millis(30));
        assert_eq!(
            summary,
            JoinSummary {
                joined: 1,
                terminated: 2,
                killed: 1
            }
        );
        assert!(workers.iter_mut().all(|w| w.is_finished()));
    }

    #[test]
    fn test_thread_worker_cancel_and_detach() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = std::thread::spawn(move || {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        let mut workers: Vec<Box<dyn WorkerHandle>> = vec![Box::new(ThreadWorker::new("t-0", handle, cancel))];
        let summary = join_with_escalation(&mut workers, Duration::from_millis(20), Duration::from_secs(2));
        assert_eq!(summary.terminated, 1);
        assert_eq!(summary.killed, 0);
        assert!(workers[0].is_finished());
    }
}
