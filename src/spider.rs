//! # Spider Module
//!
//! Defines the `Spider` trait, the crawl definition the engine runs.
//!
//! ## Overview
//!
//! A spider names a crawl and produces its seed requests. By default the seeds are built from
//! [`Spider::start_urls`] and bound to [`Spider::parse`]; spiders that need other methods,
//! headers or callbacks override [`Spider::start_requests`] instead.
//!
//! Every request a callback returns is tagged with the spider's name by the engine, and every
//! record is stamped with it, so several spiders can share one crawler.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! struct QuotesSpider {
//!     schema: Arc<ItemSchema>,
//! }
//!
//! impl Spider for QuotesSpider {
//!     fn name(&self) -> &str {
//!         "quotes"
//!     }
//!
//!     fn start_urls(&self) -> Vec<&str> {
//!         vec!["https://quotes.toscrape.com/"]
//!     }
//!
//!     fn parse(&self, response: Response) -> Result<ParseOutput, SpiderError> {
//!         let mut output = ParseOutput::new();
//!         output.add_item(StrictItem::new(&self.schema).with("url", response.url.as_str())?);
//!         Ok(output)
//!     }
//! }
//! ```

use crate::error::SpiderError;
use crate::item::ParseOutput;
use crate::request::Request;
use crate::response::Response;
use std::sync::Arc;
use url::Url;

/// Defines the contract for a crawl.
pub trait Spider: Send + Sync + 'static {
    /// Name stamped on every request and record of this crawl.
    fn name(&self) -> &str;

    /// Returns the initial URLs to start crawling from.
    fn start_urls(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Callback bound to the requests built from [`Spider::start_urls`].
    fn parse(&self, _response: Response) -> Result<ParseOutput, SpiderError> {
        Ok(ParseOutput::new())
    }

    /// Generates the initial requests to start crawling.
    fn start_requests(self: Arc<Self>) -> Result<Vec<Request>, SpiderError> {
        let urls: Result<Vec<Url>, url::ParseError> =
            self.start_urls().into_iter().map(Url::parse).collect();
        let urls = urls?;
        Ok(urls
            .into_iter()
            .map(|url| {
                let spider = Arc::clone(&self);
                Request::new(url, move |response| spider.parse(response))
            })
            .collect())
    }
}
