//! Crawl settings.
//!
//! [`Settings`] is the typed schema read from a TOML file. [`SettingsStore`] is the flattened,
//! dotted-key view of the same values (`spider.worker`, `headers.user_agent`, ...) that
//! components query at run time, with typed accessors that fall back to a default.
//!
//! ```toml
//! [spider]
//! worker = 8
//! log_level = "debug"
//!
//! [headers]
//! user_agent = "my-crawler/1.0"
//!
//! [pipeline]
//! max_size = 1000
//! max_wait_ms = 5000
//! ```

use crate::downloader::DownloaderConfig;
use crate::error::SpiderError;
use crate::logging::LogConfig;
use crate::pipeline::PipelineConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings, deserialized from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub spider: SpiderSettings,
    #[serde(default)]
    pub headers: HeaderSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// `[spider]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiderSettings {
    /// Number of worker threads.
    #[serde(default = "default_worker")]
    pub worker: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Transport timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for SpiderSettings {
    fn default() -> Self {
        Self {
            worker: default_worker(),
            log_level: default_log_level(),
            timeout_secs: default_timeout_secs(),
            proxy: None,
        }
    }
}

fn default_worker() -> usize {
    3
}
fn default_log_level() -> String {
    "info".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[headers]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderSettings {
    /// Sent on every request that does not set its own `User-Agent`.
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// `[log]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Append log lines to this file instead of stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

/// `[pipeline]` section. Zero means "no limit" / "disabled" for every field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub max_size: usize,
    #[serde(default)]
    pub max_wait_ms: u64,
    #[serde(default)]
    pub auto_flush_size: usize,
}

impl Settings {
    pub fn from_toml_str(contents: &str) -> Result<Self, SpiderError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpiderError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_size: self.pipeline.max_size,
            max_wait: (self.pipeline.max_wait_ms > 0)
                .then(|| Duration::from_millis(self.pipeline.max_wait_ms)),
            auto_flush_size: self.pipeline.auto_flush_size,
        }
    }

    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            timeout: Duration::from_secs(self.spider.timeout_secs),
            proxy: self.spider.proxy.clone(),
            user_agent: self.headers.user_agent.clone(),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.spider.log_level.clone(),
            file: self.log.log_file.clone(),
            json: self.log.json,
        }
    }
}

/// Flattened, string-keyed view of the settings.
#[derive(Debug, Default)]
pub struct SettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    pub fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Integer value of `key`, or `default` if it is missing or not an integer.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_setting(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Boolean value of `key`, or `default` if it is missing or not a boolean.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get_setting(key) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "t" | "true" => true,
                "0" | "f" | "false" => false,
                _ => default,
            },
            None => default,
        }
    }

    /// String value of `key`, empty if missing.
    pub fn get_string(&self, key: &str) -> String {
        self.get_setting(key).unwrap_or_default()
    }
}

impl From<&Settings> for SettingsStore {
    fn from(settings: &Settings) -> Self {
        let optional = |value: &Option<String>| value.clone().unwrap_or_default();
        let store = SettingsStore::new();
        store.set_setting("spider.worker", settings.spider.worker.to_string());
        store.set_setting("spider.log_level", settings.spider.log_level.clone());
        store.set_setting("spider.timeout_secs", settings.spider.timeout_secs.to_string());
        store.set_setting("spider.proxy", optional(&settings.spider.proxy));
        store.set_setting("headers.user_agent", optional(&settings.headers.user_agent));
        store.set_setting(
            "log.log_file",
            settings
                .log
                .log_file
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
        );
        store.set_setting("log.json", settings.log.json.to_string());
        store.set_setting("pipeline.max_size", settings.pipeline.max_size.to_string());
        store.set_setting("pipeline.max_wait_ms", settings.pipeline.max_wait_ms.to_string());
        store.set_setting(
            "pipeline.auto_flush_size",
            settings.pipeline.auto_flush_size.to_string(),
        );
        store
    }
}
