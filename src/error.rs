//! # Error Module
//!
//! Error types shared by every component of the engine.
//!
//! ## Overview
//!
//! Errors fall into a few classes with different consequences:
//!
//! - **Configuration errors** (`SpiderError::MissingCallback`, `SpiderError::Configuration`)
//!   are fatal and abort the run.
//! - **Admission errors** (`PipelineError::Closed`, `Full`, `ItemInvalid`, `ValidationFailed`)
//!   are returned to whoever tried to enqueue or dequeue. The engine never retries them.
//! - **Processing errors** are recorded in the pipeline statistics and reported through the
//!   `on_item_processed` callback; they never stop a worker.
//! - **Middleware and transport errors** abort a single fetch cycle. The exception chain gets
//!   one chance to replace or suppress them first.

use thiserror::Error;

/// Errors raised by the crawl engine, the fetcher and spider callbacks.
#[derive(Debug, Error)]
pub enum SpiderError {
    /// A request reached the engine without a bound callback.
    #[error("request for {url} has no callback bound")]
    MissingCallback { url: String },

    /// The engine or one of its components was configured incorrectly.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The transport call itself failed (connection refused, timeout, unreadable body...).
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// A middleware in the request or response chain failed.
    #[error("middleware '{name}' failed: {source}")]
    Middleware {
        name: String,
        #[source]
        source: Box<SpiderError>,
    },

    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// A spider callback could not make sense of a response.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("failed to parse settings: {0}")]
    Settings(#[from] toml::de::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("{0}")]
    GeneralError(String),
}

impl SpiderError {
    /// Builds a transport error from any displayable cause.
    pub fn transport(url: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        SpiderError::Transport {
            url: url.into(),
            message: cause.to_string(),
        }
    }

    /// Wraps `source` with the name of the middleware that produced it.
    pub fn middleware(name: impl Into<String>, source: SpiderError) -> Self {
        SpiderError::Middleware {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Fatal errors abort the whole run instead of a single fetch cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SpiderError::MissingCallback { .. } | SpiderError::Configuration(_)
        )
    }
}

/// Errors returned by the item pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is closed")]
    Closed,

    #[error("pipeline is full")]
    Full,

    #[error("item is invalid: {0}")]
    ItemInvalid(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while populating a [`StrictItem`](crate::item::StrictItem).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("field '{field}' is not declared by item schema '{schema}'")]
    FieldNotPermitted { field: String, schema: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middleware_errors_name_the_plugin() {
        let err = SpiderError::middleware("auth", SpiderError::Parse("bad token".into()));
        assert_eq!(
            err.to_string(),
            "middleware 'auth' failed: parse error: bad token"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn configuration_errors_are_fatal() {
        assert!(SpiderError::Configuration("no workers".into()).is_fatal());
        assert!(SpiderError::MissingCallback {
            url: "https://example.com/".into()
        }
        .is_fatal());
        assert!(!SpiderError::transport("https://example.com/", "refused").is_fatal());
    }
}
