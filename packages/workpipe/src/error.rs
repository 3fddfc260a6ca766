//! Error taxonomy for the pipeline and pool.
//!
//! Plumbing code returns `anyhow::Result` like the rest of the crate; these
//! typed variants are attached as sources so callers can `downcast_ref` when
//! they need to branch on the kind.

use thiserror::Error;

/// Pipeline stage names used when reporting item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    PreProcess,
    Process,
    PostProcess,
    OutName,
    Write,
    Session,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::PreProcess => "pre_process",
            Stage::Process => "process",
            Stage::PostProcess => "post_process",
            Stage::OutName => "outname_create",
            Stage::Write => "write",
            Stage::Session => "session",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(
        "no workers can be scheduled (items: {item_count}, max workers: {max_workers}, memory cap: {memory_cap})"
    )]
    ResourceExhausted {
        item_count: usize,
        max_workers: usize,
        memory_cap: usize,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("item '{item}' failed in {stage}: {message}")]
    ItemProcessing {
        item: String,
        stage: Stage,
        message: String,
    },

    #[error("queue transfer failed: {0}")]
    Transfer(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("ipc error: {0}")]
    Ipc(String),
}

impl PipelineError {
    pub fn item(item: impl Into<String>, stage: Stage, err: &anyhow::Error) -> Self {
        Self::ItemProcessing {
            item: item.into(),
            stage,
            message: format!("{err:#}"),
        }
    }

    /// Stage of an item failure, if this is one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ItemProcessing { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_item_error_message_names_stage_and_item() {
        let cause = anyhow::anyhow!("disk full");
        let err = PipelineError::item("a.txt", Stage::Write, &cause);
        let msg = err.to_string();
        assert!(msg.contains("a.txt"));
        assert!(msg.contains("write"));
        assert!(msg.contains("disk full"));
        assert_eq!(err.stage(), Some(Stage::Write));
    }

    #[test]
    fn test_resource_exhausted_message() {
        let err = PipelineError::ResourceExhausted {
            item_count: 3,
            max_workers: 4,
            memory_cap: 0,
        };
        assert!(err.to_string().contains("memory cap: 0"));
        assert_eq!(err.stage(), None);
    }
}
