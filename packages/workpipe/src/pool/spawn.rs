//! Worker subprocess spawning.
//!
//! Workers are the same executable re-entered through the hidden `worker`
//! subcommand, talking JSON lines over stdin/stdout.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::proc::WorkerProc;

/// How to launch a worker process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Executable to run; defaults to the current executable
    pub exe: Option<PathBuf>,
    /// Name of the registered pipeline the worker runs file jobs with
    pub pipeline: String,
    /// Verbosity flag count handed to the child
    pub verbosity: u8,
    /// Configuration file the child loads on top of its defaults
    pub config: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            exe: None,
            pipeline: pipeline.into(),
            verbosity: 0,
            config: None,
        }
    }

    pub fn with_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.exe = Some(exe.into());
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    fn executable(&self) -> Result<PathBuf> {
        match &self.exe {
            Some(exe) => Ok(exe.clone()),
            None => std::env::current_exe().context("Failed to get current executable"),
        }
    }

    fn command(&self, name: &str, coroutines: usize, poll: Duration) -> Result<Command> {
        let mut cmd = Command::new(self.executable()?);
        cmd.arg("worker")
            .arg("--name")
            .arg(name)
            .arg("--coroutines")
            .arg(coroutines.to_string())
            .arg("--pipeline")
            .arg(&self.pipeline)
            .arg("--poll-ms")
            .arg(poll.as_millis().to_string());
        if let Some(config) = &self.config {
            cmd.arg("--config").arg(config);
        }
        if self.verbosity > 0 {
            cmd.arg(format!("-{}", "v".repeat(usize::from(self.verbosity))));
        }

        // stdout carries IPC; logs go to the inherited stderr
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        Ok(cmd)
    }
}

pub fn spawn_worker(spec: &ProcessSpec, name: &str, coroutines: usize, poll: Duration) -> Result<WorkerProc> {
    let mut cmd = spec.command(name, coroutines, poll)?;
    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn worker process {name}"))?;
    tracing::debug!(worker = name, pid = child.id(), "Spawned worker process");
    Ok(WorkerProc::new(name, child))
}
