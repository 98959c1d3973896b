//! # Middleware Module
//!
//! Plugins that wrap the transport call of every fetch.
//!
//! ## Overview
//!
//! A middleware declares the capabilities it implements through [`Middleware::capabilities`].
//! Each capability is a typed handle into one of three chains:
//!
//! - **Request**: runs on the outgoing [`Request`], highest priority first
//! - **Response**: runs on the incoming [`Response`], in the mirror order of the request chain
//! - **Exception**: sees every error raised during a fetch and may transform or suppress it
//!
//! Registration, ordering and enable/disable switches live in
//! [`MiddlewareManager`](crate::crawler::MiddlewareManager).
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::middleware::{Capability, Middleware, RequestMiddleware};
//! use std::sync::Arc;
//!
//! struct Tagger;
//!
//! impl RequestMiddleware for Tagger {
//!     fn process_request(&self, request: &mut Request) -> Result<(), SpiderError> {
//!         request.meta.insert("tagged".into(), true.into());
//!         Ok(())
//!     }
//! }
//!
//! impl Middleware for Tagger {
//!     fn capabilities(self: Arc<Self>) -> Vec<Capability> {
//!         vec![Capability::Request(self)]
//!     }
//! }
//! ```

mod default_headers;
mod http_error;

pub use default_headers::DefaultHeadersMiddleware;
pub use http_error::HttpErrorMiddleware;

use crate::error::SpiderError;
use crate::request::Request;
use crate::response::Response;
use std::fmt;
use std::sync::Arc;

/// Intercepts outgoing requests.
pub trait RequestMiddleware: Send + Sync {
    /// Mutates the request in place. An error aborts the fetch.
    fn process_request(&self, request: &mut Request) -> Result<(), SpiderError>;
}

/// Intercepts incoming responses.
pub trait ResponseMiddleware: Send + Sync {
    /// Mutates the response in place. An error aborts the fetch.
    fn process_response(&self, response: &mut Response) -> Result<(), SpiderError>;
}

/// Intercepts errors raised while fetching.
pub trait ExceptionMiddleware: Send + Sync {
    fn process_exception(&self, error: &SpiderError) -> ExceptionAction;
}

/// The verdict of an [`ExceptionMiddleware`].
#[derive(Debug)]
pub enum ExceptionAction {
    /// Not handled here; ask the next middleware.
    Continue,
    /// Handled; propagate the original error unchanged.
    Propagate,
    /// Handled; propagate this error instead.
    Replace(SpiderError),
    /// Handled; the fetch is dropped without an error.
    Suppress,
}

/// A typed handle into one middleware chain.
#[derive(Clone)]
pub enum Capability {
    Request(Arc<dyn RequestMiddleware>),
    Response(Arc<dyn ResponseMiddleware>),
    Exception(Arc<dyn ExceptionMiddleware>),
}

impl Capability {
    pub fn kind(&self) -> &'static str {
        match self {
            Capability::Request(_) => "request",
            Capability::Response(_) => "response",
            Capability::Exception(_) => "exception",
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability::{}", self.kind())
    }
}

/// A plugin of the fetch path.
///
/// Implementors return one [`Capability`] per chain they want to join. The same instance may
/// join several chains.
pub trait Middleware: Send + Sync + 'static {
    fn capabilities(self: Arc<Self>) -> Vec<Capability>;
}

/// Named priority levels. Any `i32` is accepted; higher runs earlier on the request side.
pub struct Priority;

impl Priority {
    pub const FIRST: i32 = 100;
    pub const HIGH: i32 = 50;
    pub const NORMAL: i32 = 0;
    pub const LOW: i32 = -50;
    pub const LAST: i32 = -100;
}

/// Registration options of a middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareConfig {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub group: String,
}

impl MiddlewareConfig {
    pub fn new(name: impl Into<String>) -> Self {
        MiddlewareConfig {
            name: name.into(),
            priority: Priority::NORMAL,
            enabled: true,
            group: "default".to_string(),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Registry key of the middleware.
    pub fn id(&self) -> String {
        format!("mw-{}", self.name)
    }
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = MiddlewareConfig::new("retry");
        assert_eq!(config.priority, Priority::NORMAL);
        assert!(config.enabled);
        assert_eq!(config.group, "default");
        assert_eq!(config.id(), "mw-retry");

        let config = config.priority(Priority::HIGH).group("net").enabled(false);
        assert_eq!(config.priority, 50);
        assert_eq!(config.group, "net");
        assert!(!config.enabled);
    }
}
