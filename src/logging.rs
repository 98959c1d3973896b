//! Log subscriber construction.
//!
//! The engine does not install a global subscriber. [`build_dispatch`] turns a [`LogConfig`]
//! into a [`Dispatch`] that is handed to the crawler builder and installed on every worker
//! thread. Applications that want a process-wide default call [`init`] instead.

use crate::error::SpiderError;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// How log lines are filtered, formatted and written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// An `EnvFilter` directive such as `info` or `spider_engine=debug`.
    /// `RUST_LOG`, when set, takes precedence.
    pub level: String,
    /// Append to this file instead of writing to stdout.
    pub file: Option<PathBuf>,
    /// Emit one JSON object per line.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

/// Builds a dispatch from `config` without installing it.
pub fn build_dispatch(config: &LogConfig) -> Result<Dispatch, SpiderError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            SpiderError::Configuration(format!("invalid log level '{}': {}", config.level, e))
        })?,
    };

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_thread_names(true)
            .boxed()
    };

    let subscriber = Registry::default().with(layer).with(filter);
    Ok(Dispatch::new(subscriber))
}

/// Builds a dispatch from `config` and installs it as the process-wide default.
pub fn init(config: &LogConfig) -> Result<(), SpiderError> {
    let dispatch = build_dispatch(config)?;
    tracing::dispatcher::set_global_default(dispatch)
        .map_err(|e| SpiderError::Configuration(format!("logger already installed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_json_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.log");
        let dispatch = build_dispatch(&LogConfig {
            level: "debug".into(),
            file: Some(path.clone()),
            json: true,
        })
        .unwrap();

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(worker = 1, "worker started");
            tracing::trace!("too fine to be written");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["fields"]["message"], "worker started");
        assert_eq!(lines[0]["fields"]["worker"], 1);
    }

    #[test]
    fn rejects_unparsable_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "spider_engine=loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_dispatch(&config),
            Err(SpiderError::Configuration(_))
        ));
    }
}
