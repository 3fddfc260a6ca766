use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Uptime plus a snapshot of every counter.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub uptime: Duration,
    pub counters: BTreeMap<String, i64>,
}

impl StatsReport {
    pub fn new(uptime: Duration, counters: BTreeMap<String, i64>) -> Self {
        Self { uptime, counters }
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.uptime.as_secs();
        writeln!(
            f,
            "uptime: {}d {:02}h {:02}m {:02}s",
            secs / 86_400,
            (secs % 86_400) / 3_600,
            (secs % 3_600) / 60,
            secs % 60
        )?;
        if self.counters.is_empty() {
            return writeln!(f, "no counters recorded");
        }
        let width = self.counters.keys().map(String::len).max().unwrap_or(0);
        for (name, value) in &self.counters {
            writeln!(f, "{name:<width$}  {value}")?;
        }
        Ok(())
    }
}
