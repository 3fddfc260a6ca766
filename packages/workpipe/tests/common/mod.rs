#![allow(dead_code)]

use std::sync::Arc;

use workpipe::config::{BackendKind, ConfigLookup, PerformanceSettings, Settings};
use workpipe::session::HandlerRegistry;

/// Configuration with nothing set.
pub struct NoConfig;

impl ConfigLookup for NoConfig {
    fn get_int(&self, _: &str, _: &str) -> Option<i64> {
        None
    }
    fn get_bool(&self, _: &str, _: &str) -> Option<bool> {
        None
    }
    fn get_str(&self, _: &str, _: &str) -> Option<String> {
        None
    }
}

pub fn registry() -> Arc<HandlerRegistry> {
    Arc::new(HandlerRegistry::new(Arc::new(NoConfig)))
}

/// Thread backend with short polls so tests stay quick.
pub fn fast_settings(coroutines: usize, queue_size: usize) -> PerformanceSettings {
    PerformanceSettings {
        backend: BackendKind::Thread,
        coroutines,
        queue_size,
        poll_interval_ms: 50,
        join_timeout_ms: 3000,
        handoff_join_timeout_ms: 5000,
        terminate_grace_ms: 200,
        ..PerformanceSettings::default()
    }
}

pub fn driver_settings(coroutines: usize, queue_size: usize) -> Settings {
    Settings {
        performance: fast_settings(coroutines, queue_size),
        ..Settings::default()
    }
}
