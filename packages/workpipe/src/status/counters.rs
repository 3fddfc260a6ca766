use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::delta::StatDelta;

/// Named counters shared between the listener and report readers.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    inner: Arc<Mutex<BTreeMap<String, i64>>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta with increment semantics.
    pub fn apply(&self, delta: &StatDelta) -> Result<()> {
        if delta.counter.is_empty() {
            bail!("stat delta without a counter name");
        }
        let mut counters = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("counter table lock poisoned"))?;
        let value = counters.entry(delta.counter.clone()).or_insert(0);
        *value = value.checked_add(delta.delta).ok_or_else(|| {
            anyhow::anyhow!("counter '{}' overflowed applying {}", delta.counter, delta.delta)
        })?;
        Ok(())
    }

    pub fn get(&self, counter: &str) -> i64 {
        self.inner
            .lock()
            .ok()
            .and_then(|c| c.get(counter).copied())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.inner.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_increments() {
        let counters = Counters::new();
        counters.apply(&StatDelta::incr("in")).unwrap();
        counters.apply(&StatDelta::new("in", 4)).unwrap();
        counters.apply(&StatDelta::new("out", -2)).unwrap();
        assert_eq!(counters.get("in"), 5);
        assert_eq!(counters.get("out"), -2);
        assert_eq!(counters.get("missing"), 0);
    }

    #[test]
    fn test_bad_deltas_are_rejected_without_changing_state() {
        let counters = Counters::new();
        counters.apply(&StatDelta::new("big", i64::MAX)).unwrap();
        assert!(counters.apply(&StatDelta::incr("big")).is_err());
        assert!(counters.apply(&StatDelta::incr("")).is_err());
        assert_eq!(counters.get("big"), i64::MAX);
        assert_eq!(counters.snapshot().len(), 1);
    }
}
