//! # spider-engine
//!
//! A thread-pool crawl engine.
//!
//! Provides the main components: a FIFO [`Scheduler`] of pending requests, a priority-ordered
//! middleware chain around the transport call, a bounded, backpressure-aware [`ItemPipeline`]
//! for scraped records, and the [`Crawler`] that runs a fixed pool of worker threads over them
//! until no work is left.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! struct TitleSpider {
//!     schema: Arc<ItemSchema>,
//! }
//!
//! impl Spider for TitleSpider {
//!     fn name(&self) -> &str {
//!         "titles"
//!     }
//!
//!     fn start_urls(&self) -> Vec<&str> {
//!         vec!["https://example.com"]
//!     }
//!
//!     fn parse(&self, response: Response) -> Result<ParseOutput, SpiderError> {
//!         let mut output = ParseOutput::new();
//!         let item = StrictItem::new(&self.schema).with("length", response.body.len())?;
//!         output.add_item(item);
//!         Ok(output)
//!     }
//! }
//!
//! fn run_crawler() -> Result<(), SpiderError> {
//!     let schema = ItemSchema::new("page", ["length"]);
//!     let crawler = CrawlerBuilder::new()
//!         .add_spider(TitleSpider { schema })
//!         .worker_count(4)
//!         .build()?;
//!     crawler.start_crawl()
//! }
//! ```

pub mod builder;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod item;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod prelude;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod settings;
pub mod spider;
pub mod state;
pub mod stats;

pub use builder::CrawlerBuilder;
pub use crawler::{Crawler, Fetcher, MiddlewareManager};
pub use downloader::{Downloader, DownloaderConfig, ReqwestClientDownloader};
pub use error::{ItemError, PipelineError, SpiderError};
pub use pipeline::{ItemPipeline, PipelineConfig};
pub use scheduler::Scheduler;
pub use spider::Spider;
