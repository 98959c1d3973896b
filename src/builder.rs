//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and configuring `Crawler`
//! instances.
//!
//! ## Overview
//!
//! The builder collects the spiders, the settings, the transport, the middlewares and the item
//! pipeline's stages, then assembles them into a [`Crawler`]. Values not set explicitly come
//! from [`Settings`].
//!
//! ## Default Handling
//!
//! - Without a custom downloader, a [`ReqwestClientDownloader`] is built from the settings'
//!   timeout, proxy and user agent.
//! - With a configured user agent, a [`DefaultHeadersMiddleware`] is registered as
//!   `default_headers` unless a middleware of that name already exists.
//! - Without any item processor, a [`ConsoleWriter`] is added.
//! - Without an explicit [`log_dispatch`](CrawlerBuilder::log_dispatch), logging is built from
//!   the `[log]` settings and `spider.log_level`. A process-wide subscriber installed with
//!   [`logging::init`] is kept unless the settings name a log file.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! fn run() -> Result<(), SpiderError> {
//!     let settings = Settings::from_file("spider.toml")?;
//!     let crawler = CrawlerBuilder::new()
//!         .settings(&settings)
//!         .add_spider(QuotesSpider::new())
//!         .add_middleware(HttpErrorMiddleware::new(), MiddlewareConfig::new("http_error"))
//!         .add_processor(JsonLinesWriter::new("quotes.jsonl")?)
//!         .build()?;
//!
//!     crawler.start_crawl()
//! }
//! ```

use crate::crawler::{Crawler, MiddlewareManager};
use crate::downloader::{Downloader, ReqwestClientDownloader};
use crate::error::SpiderError;
use crate::item::StrictItem;
use crate::logging;
use crate::middleware::{DefaultHeadersMiddleware, Middleware, MiddlewareConfig, Priority};
use crate::pipeline::{ConsoleWriter, ItemPipeline, ItemProcessor, PipelineCallbacks, PipelineConfig};
use crate::settings::{Settings, SettingsStore};
use crate::spider::Spider;
use std::sync::Arc;
use tracing::{debug, Dispatch};

type PipelineStage = Box<dyn FnOnce(&ItemPipeline) + Send>;

/// Assembles a [`Crawler`].
pub struct CrawlerBuilder {
    settings: Settings,
    spiders: Vec<Arc<dyn Spider>>,
    worker_count: Option<usize>,
    pipeline_config: Option<PipelineConfig>,
    downloader: Option<Arc<dyn Downloader>>,
    middlewares: MiddlewareManager,
    pipeline_stages: Vec<PipelineStage>,
    has_processor: bool,
    dispatch: Option<Dispatch>,
    errors: Vec<SpiderError>,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            spiders: Vec::new(),
            worker_count: None,
            pipeline_config: None,
            downloader: None,
            middlewares: MiddlewareManager::new(),
            pipeline_stages: Vec::new(),
            has_processor: false,
            dispatch: None,
            errors: Vec::new(),
        }
    }
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a spider. Its seed requests are enqueued when the crawl starts.
    pub fn add_spider<S: Spider>(mut self, spider: S) -> Self {
        self.spiders.push(Arc::new(spider));
        self
    }

    /// Replaces the settings every unset option falls back to.
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.settings = settings.clone();
        self
    }

    /// Sets the number of worker threads, overriding `spider.worker`.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Sets the item pipeline's configuration, overriding the `[pipeline]` settings.
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config);
        self
    }

    /// Sets a custom downloader for the crawler.
    pub fn downloader<D: Downloader + 'static>(mut self, downloader: D) -> Self {
        self.downloader = Some(Arc::new(downloader));
        self
    }

    /// Registers a middleware. Registration errors are reported by [`build`](Self::build).
    pub fn add_middleware<M: Middleware>(mut self, middleware: M, config: MiddlewareConfig) -> Self {
        if let Err(e) = self.middlewares.register(middleware, config) {
            self.errors.push(e);
        }
        self
    }

    /// Appends a processor to the item pipeline's chain.
    pub fn add_processor<P: ItemProcessor>(mut self, processor: P) -> Self {
        self.has_processor = true;
        self.pipeline_stages
            .push(Box::new(move |pipeline: &ItemPipeline| pipeline.add_processor(processor)));
        self
    }

    /// Sets the item pipeline's single processor, which replaces the chain.
    pub fn set_processor<P: ItemProcessor>(mut self, processor: P) -> Self {
        self.has_processor = true;
        self.pipeline_stages
            .push(Box::new(move |pipeline: &ItemPipeline| pipeline.set_processor(processor)));
        self
    }

    pub fn add_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&StrictItem) -> Result<(), String> + Send + Sync + 'static,
    {
        self.pipeline_stages
            .push(Box::new(move |pipeline: &ItemPipeline| pipeline.add_validator(validator)));
        self
    }

    pub fn add_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&StrictItem) -> bool + Send + Sync + 'static,
    {
        self.pipeline_stages
            .push(Box::new(move |pipeline: &ItemPipeline| pipeline.add_filter(filter)));
        self
    }

    pub fn pipeline_callbacks(mut self, callbacks: PipelineCallbacks) -> Self {
        self.pipeline_stages
            .push(Box::new(move |pipeline: &ItemPipeline| pipeline.set_callbacks(callbacks)));
        self
    }

    /// Log dispatch installed on the crawl and every worker thread. Overrides the `[log]`
    /// settings.
    pub fn log_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Builds the `Crawler`.
    pub fn build(mut self) -> Result<Crawler, SpiderError> {
        if let Some(e) = self.errors.drain(..).next() {
            return Err(e);
        }
        if self.spiders.is_empty() {
            return Err(SpiderError::Configuration(
                "Crawler must have at least one spider.".to_string(),
            ));
        }
        if let Some(count) = self.worker_count {
            self.settings.spider.worker = count;
        }
        if self.settings.spider.worker == 0 {
            return Err(SpiderError::Configuration(
                "worker count must be greater than 0.".to_string(),
            ));
        }

        let downloader = match self.downloader.take() {
            Some(downloader) => downloader,
            None => Arc::new(ReqwestClientDownloader::new(
                &self.settings.downloader_config(),
            )?),
        };

        if let Some(user_agent) = &self.settings.headers.user_agent {
            if !self.middlewares.is_registered("default_headers") {
                debug!("Registering default headers middleware");
                self.middlewares.register(
                    DefaultHeadersMiddleware::new().user_agent(user_agent.as_str()),
                    MiddlewareConfig::new("default_headers").priority(Priority::FIRST),
                )?;
            }
        }

        let config = self
            .pipeline_config
            .take()
            .unwrap_or_else(|| self.settings.pipeline_config());
        let pipeline = ItemPipeline::new(config);
        for stage in self.pipeline_stages {
            stage(&pipeline);
        }
        if !self.has_processor {
            pipeline.add_processor(ConsoleWriter::new());
        }

        let dispatch = match self.dispatch.take() {
            Some(dispatch) => Some(dispatch),
            None if self.settings.log.log_file.is_some()
                || !tracing::dispatcher::has_been_set() =>
            {
                Some(logging::build_dispatch(&self.settings.log_config())?)
            }
            None => None,
        };

        let settings = Arc::new(SettingsStore::from(&self.settings));
        Ok(Crawler::new(
            self.spiders,
            pipeline,
            Arc::new(self.middlewares),
            downloader,
            settings,
            dispatch,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::response::Response;

    struct Nothing;

    impl Spider for Nothing {
        fn name(&self) -> &str {
            "nothing"
        }
    }

    struct Offline;

    impl Downloader for Offline {
        fn download(&self, request: &Request) -> Result<Response, SpiderError> {
            Err(SpiderError::transport(request.url.as_str(), "offline"))
        }
    }

    #[test]
    fn requires_a_spider() {
        let err = CrawlerBuilder::new().downloader(Offline).build().err().unwrap();
        assert!(matches!(err, SpiderError::Configuration(_)));
    }

    #[test]
    fn requires_workers() {
        let result = CrawlerBuilder::new()
            .add_spider(Nothing)
            .downloader(Offline)
            .worker_count(0)
            .build();
        assert!(matches!(result, Err(SpiderError::Configuration(_))));
    }

    #[test]
    fn reports_duplicate_middlewares() {
        let result = CrawlerBuilder::new()
            .add_spider(Nothing)
            .downloader(Offline)
            .add_middleware(DefaultHeadersMiddleware::new(), MiddlewareConfig::new("h"))
            .add_middleware(DefaultHeadersMiddleware::new(), MiddlewareConfig::new("h"))
            .build();
        assert!(matches!(result, Err(SpiderError::Configuration(_))));
    }

    #[test]
    fn settings_flow_into_the_crawler() {
        let mut settings = Settings::default();
        settings.headers.user_agent = Some("builder-test".into());
        settings.pipeline.max_size = 7;

        let crawler = CrawlerBuilder::new()
            .settings(&settings)
            .worker_count(5)
            .add_spider(Nothing)
            .downloader(Offline)
            .build()
            .unwrap();

        assert_eq!(crawler.settings().get_int("spider.worker", 3), 5);
        assert_eq!(crawler.pipeline().config().max_size, 7);
        assert!(crawler.middlewares().is_registered("default_headers"));
    }

    struct OnePage;

    impl Spider for OnePage {
        fn name(&self) -> &str {
            "one_page"
        }

        fn start_urls(&self) -> Vec<&str> {
            vec!["https://example.com/"]
        }
    }

    #[test]
    fn log_settings_configure_the_crawl_logger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.log");
        let mut settings = Settings::default();
        settings.spider.log_level = "debug".into();
        settings.log.log_file = Some(path.clone());
        settings.log.json = true;

        let crawler = CrawlerBuilder::new()
            .settings(&settings)
            .worker_count(1)
            .add_spider(OnePage)
            .downloader(Offline)
            .build()
            .unwrap();
        assert!(path.exists());
        crawler.start_crawl().unwrap();

        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let messages: Vec<String> = contents
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
            .filter_map(|line| line["fields"]["message"].as_str().map(str::to_owned))
            .collect();
        assert!(messages.iter().any(|m| m.starts_with("Crawler starting crawl")));
        assert!(messages.iter().any(|m| m.starts_with("Worker 0 started")));
    }

    #[test]
    fn invalid_log_level_fails_the_build() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let mut settings = Settings::default();
        settings.spider.log_level = "spider_engine=loud".into();

        let result = CrawlerBuilder::new()
            .settings(&settings)
            .add_spider(Nothing)
            .downloader(Offline)
            .build();
        assert!(matches!(result, Err(SpiderError::Configuration(_))));
    }
}
