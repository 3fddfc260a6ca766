//! Handle to a worker subprocess.

use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus};

use crate::error::PipelineError;

pub struct WorkerProc {
    name: String,
    child: Child,
    status: Option<ExitStatus>,
}

impl WorkerProc {
    pub fn new(name: impl Into<String>, child: Child) -> Self {
        Self {
            name: name.into(),
            child,
            status: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Take the pipe ends used for IPC. Only succeeds once.
    pub fn take_pipes(&mut self) -> Result<(ChildStdin, ChildStdout)> {
        let stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Worker(format!("{}: stdin not captured", self.name)))?;
        let stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Worker(format!("{}: stdout not captured", self.name)))?;
        Ok((stdin, stdout))
    }

    /// Non-blocking exit check; reaps the child once it has exited.
    pub fn has_exited(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(worker = %self.name, %status, "Worker process exited");
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(worker = %self.name, "Failed to poll worker process: {e}");
                true
            }
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Send SIGTERM.
    pub fn terminate(&mut self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.signal(Signal::SIGTERM)
    }

    /// Send SIGKILL and reap.
    pub fn kill(&mut self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.signal(Signal::SIGKILL)?;
        self.wait()
    }

    /// Block until the child exits.
    pub fn wait(&mut self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        let status = self
            .child
            .wait()
            .with_context(|| format!("Failed to wait for {}", self.name))?;
        self.status = Some(status);
        Ok(())
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        let pid = Pid::from_raw(self.child.id() as i32);
        signal::kill(pid, sig)
            .map_err(|e| PipelineError::Worker(format!("Failed to send {sig:?} to {}: {e}", self.name)))?;
        Ok(())
    }
}
