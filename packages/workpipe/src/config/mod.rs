//! Layered configuration.

pub mod core;

pub use self::core::{
    BackendKind, ConfigLookup, PerformanceSettings, PipeConfig, PipelineSettings, Settings,
};
