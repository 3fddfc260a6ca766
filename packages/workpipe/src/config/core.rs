use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::Options;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Worker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Process,
    Thread,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::Process => "process",
            BackendKind::Thread => "thread",
        })
    }
}

/// `[performance]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub backend: BackendKind,
    pub processes: usize,
    pub coroutines: usize,
    pub queue_size: usize,
    pub poll_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub handoff_join_timeout_ms: u64,
    pub terminate_grace_ms: u64,
    pub listener_stop_timeout_ms: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Process,
            processes: 0,
            coroutines: 5,
            queue_size: 0,
            poll_interval_ms: 250,
            join_timeout_ms: 1000,
            handoff_join_timeout_ms: 10_000,
            terminate_grace_ms: 500,
            listener_stop_timeout_ms: 2000,
        }
    }
}

impl PerformanceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn handoff_join_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_join_timeout_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn listener_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_stop_timeout_ms)
    }
}

/// `[pipeline]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub memory_fraction: f64,
    pub per_item_memory: Option<u64>,
    pub max_workers: Option<usize>,
    pub outdir: Option<String>,
    pub outname_append: Option<String>,
    pub create_outdir: bool,
    pub options: Options,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            memory_fraction: crate::parallel::budget::DEFAULT_MEMORY_FRACTION,
            per_item_memory: None,
            max_workers: None,
            outdir: None,
            outname_append: None,
            create_outdir: false,
            options: Options::new(),
        }
    }
}

impl PipelineSettings {
    /// Stage options: `[pipeline.options]` plus the naming keys of this section.
    pub fn stage_options(&self) -> Options {
        let mut options = self.options.clone();
        if let Some(outdir) = &self.outdir {
            options.insert("outdir".into(), outdir.clone().into());
        }
        if let Some(append) = &self.outname_append {
            options.insert("outname_append".into(), append.clone().into());
        }
        if self.create_outdir {
            options.insert("create_outdir".into(), true.into());
        }
        options
    }
}

/// Typed view of the merged configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub performance: PerformanceSettings,
    pub pipeline: PipelineSettings,
}

/// Integer, boolean and string lookups by section and key.
pub trait ConfigLookup: Send + Sync {
    fn get_int(&self, section: &str, key: &str) -> Option<i64>;
    fn get_bool(&self, section: &str, key: &str) -> Option<bool>;
    fn get_str(&self, section: &str, key: &str) -> Option<String>;
}

pub struct PipeConfig {
    figment: Figment,
    source: Option<PathBuf>,
}

impl PipeConfig {
    /// Layer every configuration source, lowest priority first.
    pub fn load<T: Serialize>(custom_config: Option<&Path>, cli_overrides: Option<T>) -> Result<Self> {
        tracing::trace!("CONFIG LOAD: Starting");

        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG)); // 1. Defaults

        if let Some(user) = Self::user_config_path() {
            figment = figment.merge(Toml::file(user)); // 2. User config
        }
        figment = figment.merge(Toml::file("workpipe.toml")); // 3. Project config

        if let Some(path) = custom_config {
            // 4. Custom config
            if !path.exists() {
                tracing::warn!(path = %path.display(), "Config file not found, using remaining layers");
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("WORKPIPE_").split("__")); // 5. Environment

        if let Some(cli) = cli_overrides {
            tracing::trace!("CONFIG LOAD: Applying CLI overrides");
            figment = figment.merge(Serialized::defaults(cli)); // 6. CLI (highest)
        }

        Ok(Self {
            figment,
            source: custom_config.map(Path::to_path_buf),
        })
    }

    /// Embedded defaults, environment and project files only.
    pub fn defaults() -> Result<Self> {
        Self::load(None, None::<&()>)
    }

    /// The `--config` file this configuration was loaded with.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn settings(&self) -> Result<Settings> {
        self.figment
            .extract()
            .context("Invalid workpipe configuration")
    }

    /// Get a nested object/section as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        Ok(self.figment.extract_inner(path)?)
    }

    pub fn get_full_config(&self) -> Result<serde_json::Value> {
        Ok(self.figment.extract()?)
    }

    fn lookup<V: serde::de::DeserializeOwned>(&self, section: &str, key: &str) -> Option<V> {
        self.figment.extract_inner(&format!("{section}.{key}")).ok()
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("workpipe").join("config.toml"))
    }
}

impl ConfigLookup for PipeConfig {
    fn get_int(&self, section: &str, key: &str) -> Option<i64> {
        self.lookup(section, key)
    }

    fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        self.lookup(section, key)
    }

    fn get_str(&self, section: &str, key: &str) -> Option<String> {
        self.lookup(section, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_config_loads_defaults() {
        let config = PipeConfig::defaults().expect("Should load default config");
        let full = config.get_full_config().unwrap();
        assert!(full.get("performance").is_some());
        assert!(full.get("pipeline").is_some());

        let settings = config.settings().unwrap();
        assert!(settings.performance.coroutines >= 1);
        assert!(settings.pipeline.memory_fraction > 0.0);
    }

    #[test]
    fn test_lookup_capability() {
        let config = PipeConfig::defaults().unwrap();
        assert!(config.get_int("performance", "poll_interval_ms").is_some());
        assert!(config.get_bool("pipeline", "create_outdir").is_some());
        assert!(config.get_str("performance", "backend").is_some());
        assert_eq!(config.get_int("performance", "no_such_key"), None);
        assert_eq!(config.get_str("no_such_section", "x"), None);
    }

    #[test]
    fn test_custom_file_then_cli_override() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(
            &path,
            "[performance]\ncoroutines = 9\nqueue_size = 33\n\n[pipeline.options]\nx = 1\n",
        )
        .unwrap();

        let config = PipeConfig::load(Some(path.as_path()), None::<&()>).unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.performance.coroutines, 9);
        assert_eq!(settings.performance.queue_size, 33);
        assert_eq!(settings.pipeline.options["x"], json!(1));
        assert_eq!(config.source(), Some(path.as_path()));

        let overrides = json!({ "performance": { "coroutines": 2 } });
        let config = PipeConfig::load(Some(path.as_path()), Some(overrides)).unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.performance.coroutines, 2);
        assert_eq!(settings.performance.queue_size, 33);
    }

    #[test]
    fn test_environment_layer() {
        unsafe {
            std::env::set_var("WORKPIPE_SESSION__HOLD_MS", "17");
        }
        let config = PipeConfig::defaults().unwrap();
        assert_eq!(config.get_int("session", "hold_ms"), Some(17));
        unsafe {
            std::env::remove_var("WORKPIPE_SESSION__HOLD_MS");
        }
    }

    #[test]
    fn test_missing_custom_config_is_tolerated() {
        let config = PipeConfig::load(Some(Path::new("non_existent.toml")), None::<&()>);
        assert!(config.is_ok(), "Should handle missing custom config gracefully");
    }

    #[test]
    fn test_stage_options_fold_naming_keys() {
        let settings = PipelineSettings {
            outdir: Some("out".into()),
            outname_append: Some("_x".into()),
            create_outdir: true,
            ..PipelineSettings::default()
        };
        let options = settings.stage_options();
        assert_eq!(options["outdir"], json!("out"));
        assert_eq!(options["outname_append"], json!("_x"));
        assert_eq!(options["create_outdir"], json!(true));
    }
}
