//! A "prelude" for users of the `spider-engine` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that they can be
//! easily imported.
//!
//! # Example
//!
//! ```
//! use spider_engine::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawler,
    CrawlerBuilder,
    // Core traits
    Downloader,
    Spider,
};

pub use crate::error::{ItemError, PipelineError, SpiderError};
pub use crate::item::{ItemSchema, ParseOutput, StrictItem};
pub use crate::middleware::{
    Capability, ExceptionAction, ExceptionMiddleware, HttpErrorMiddleware, Middleware,
    MiddlewareConfig, Priority, RequestMiddleware, ResponseMiddleware,
};
pub use crate::pipeline::{
    ConsoleWriter, ItemPipeline, ItemProcessor, JsonLinesWriter, PipelineCallbacks,
    PipelineConfig,
};
pub use crate::request::Request;
pub use crate::response::Response;
pub use crate::settings::Settings;
pub use std::sync::Arc;
