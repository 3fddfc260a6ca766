//! Per-item results and result pruning.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata accumulated by the stages of one item.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key set on results synthesized for items that never ran.
pub const DEFERRED_KEY: &str = "deferred";
pub const DEFERRED_REASON: &str = "temporarily unavailable, retry later";

/// `(output name, metadata)`; `output == None` means the item was dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub output: Option<String>,
    #[serde(default)]
    pub meta: Metadata,
}

impl ProcessingResult {
    pub fn written(output: impl Into<String>, meta: Metadata) -> Self {
        Self {
            output: Some(output.into()),
            meta,
        }
    }

    /// Intentionally dropped item.
    pub fn dropped(meta: Metadata) -> Self {
        Self { output: None, meta }
    }

    /// Result for an item abandoned during shutdown before any worker ran it.
    pub fn deferred() -> Self {
        let mut meta = Metadata::new();
        meta.insert(DEFERRED_KEY.into(), Value::String(DEFERRED_REASON.into()));
        Self { output: None, meta }
    }

    pub fn is_dropped(&self) -> bool {
        self.output.is_none()
    }

    pub fn is_deferred(&self) -> bool {
        self.output.is_none() && self.meta.contains_key(DEFERRED_KEY)
    }

    /// Shallow-merge stage metadata into the accumulated metadata.
    pub fn merge_meta(meta: &mut Metadata, extra: Metadata) {
        for (key, value) in extra {
            meta.insert(key, value);
        }
    }
}

/// Drop every result without an output together with its input, keeping the
/// relative order of what remains.
pub fn prune_results<T: Clone>(
    results: &[ProcessingResult],
    items: &[T],
) -> (Vec<ProcessingResult>, Vec<T>) {
    results
        .iter()
        .zip(items.iter())
        .filter(|(result, _)| result.output.is_some())
        .map(|(result, item)| (result.clone(), item.clone()))
        .unzip()
}
