//! Units of work and the envelopes that carry them through the shared queue.

use serde::{Deserialize, Serialize};

/// Named options handed to every stage (the worker configuration).
pub type Options = serde_json::Map<String, serde_json::Value>;

/// Shallow-merge `overrides` over `base`; keys in `overrides` win.
pub fn merge_options(base: &Options, overrides: &Options) -> Options {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// String option, ignoring empty strings and non-string values.
pub fn opt_str<'a>(options: &'a Options, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Boolean option; absent or non-boolean is `false`.
pub fn opt_bool(options: &Options, key: &str) -> bool {
    options.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Hand-off of an accepted network session to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTicket {
    /// Opaque transport handle understood by the session handler
    pub transport: String,
    /// Module (namespace) of the handler in the registry
    pub handler_module: String,
    /// Handler class within the module
    pub handler_class: String,
    /// Port the session was accepted on
    pub port: u16,
}

impl SessionTicket {
    pub fn new(
        transport: impl Into<String>,
        handler_module: impl Into<String>,
        handler_class: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            transport: transport.into(),
            handler_module: handler_module.into(),
            handler_class: handler_class.into(),
            port,
        }
    }

    /// Registry key: `module.class`
    pub fn handler_key(&self) -> String {
        format!("{}.{}", self.handler_module, self.handler_class)
    }
}

/// One unit of input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItem {
    File { path: String },
    Session(SessionTicket),
}

impl WorkItem {
    pub fn file(path: impl Into<String>) -> Self {
        WorkItem::File { path: path.into() }
    }

    /// Identity used in logs and error messages.
    pub fn label(&self) -> String {
        match self {
            WorkItem::File { path } => path.clone(),
            WorkItem::Session(ticket) => {
                format!("session {} on port {}", ticket.transport, ticket.port)
            }
        }
    }
}

/// A work item bound to the options it must be processed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub item: WorkItem,
    #[serde(default)]
    pub options: Options,
    /// A caller is waiting for this job's `ProcessingResult`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collect: bool,
}

impl Job {
    pub fn new(id: u64, item: WorkItem, options: Options) -> Self {
        Self {
            id,
            item,
            options,
            collect: false,
        }
    }

    /// Mark the job as awaited so its result is posted back.
    pub fn collected(mut self) -> Self {
        self.collect = true;
        self
    }

    /// Only awaited file jobs answer with a `ProcessingResult`; sessions
    /// answer their peer.
    pub fn expects_outcome(&self) -> bool {
        self.collect && matches!(self.item, WorkItem::File { .. })
    }
}

/// What travels through the shared work queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Task(Job),
    /// Poison pill: ends exactly the slot that dequeues it
    Pill,
}

impl Envelope {
    pub fn is_pill(&self) -> bool {
        matches!(self, Envelope::Pill)
    }
}
