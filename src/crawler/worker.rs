//! The worker loop of the crawl engine.
//!
//! Each worker repeatedly takes a request from the scheduler, fetches it, hands the response
//! to the request's callback and routes the callback's output: child requests go back onto the
//! scheduler, records into the item pipeline. Between cycles, and whenever it has nothing to
//! fetch, a worker processes pending items.
//!
//! A worker exits once no request is outstanding and the item pipeline is empty. See
//! [`CrawlerState`] for why that check is race-free.

use crate::crawler::Fetcher;
use crate::error::SpiderError;
use crate::item::{ParseOutput, StrictItem};
use crate::pipeline::{Admission, ItemPipeline};
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How long an idle worker sleeps before re-checking for work.
const IDLE_WAIT: Duration = Duration::from_millis(50);

pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) pipeline: ItemPipeline,
    pub(crate) fetcher: Fetcher,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) stats: Arc<StatCollector>,
}

impl Worker {
    /// Runs until the crawl is finished or aborted. Returns the fatal error that stopped it.
    pub(crate) fn run(self) -> Result<(), SpiderError> {
        debug!("Worker {} started", self.id);
        let mut cycles = 0usize;

        loop {
            if self.state.is_aborted() {
                debug!("Worker {} stopping: crawl aborted", self.id);
                break;
            }

            match self.scheduler.dequeue_request() {
                Some(request) => {
                    let result = self.run_cycle(request);
                    self.state.request_finished();
                    cycles += 1;
                    if let Err(e) = result {
                        error!("Worker {} hit a fatal error: {}", self.id, e);
                        self.state.abort();
                        return Err(e);
                    }
                    if !self.pipeline.is_empty() {
                        self.process_pending();
                    }
                }
                None => {
                    if self.state.is_idle() && self.scheduler.is_empty() && self.pipeline.is_empty()
                    {
                        break;
                    }
                    if !self.process_pending() {
                        self.state.wait_for_work(IDLE_WAIT);
                    }
                }
            }
        }

        debug!("Worker {} finished after {} cycles", self.id, cycles);
        Ok(())
    }

    /// Fetches one request and routes its callback's output.
    ///
    /// Only fatal errors are returned; everything else is logged and counted.
    fn run_cycle(&self, request: Request) -> Result<(), SpiderError> {
        let callback = Arc::clone(request.callback());
        let spider_name = request.spider_name().map(str::to_owned);
        let depth = request.depth();
        let url = request.url.to_string();

        let response = match self.fetcher.fetch(request) {
            Ok(Some(response)) => response,
            Ok(None) => {
                trace!("Fetch of {} was dropped by an exception middleware", url);
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                return Ok(());
            }
        };

        debug!("Parsing response from {}", url);
        let output = match callback(response) {
            Ok(output) => output,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Spider parsing error for {}: {}", url, e);
                self.stats.increment_parse_errors();
                return Ok(());
            }
        };

        self.process_crawl_outputs(output, spider_name.as_deref(), depth, &url);
        Ok(())
    }

    fn process_crawl_outputs(
        &self,
        output: ParseOutput,
        spider_name: Option<&str>,
        depth: usize,
        url: &str,
    ) {
        let (items, requests) = output.into_parts();
        trace!(
            "Callback for {} produced {} requests and {} items",
            url,
            requests.len(),
            items.len()
        );

        for mut child in requests {
            child.tag_provenance(spider_name, depth + 1);
            // The parent is still outstanding, so the counter cannot reach zero in between.
            self.state.request_scheduled();
            match self.scheduler.enqueue_request(child) {
                Ok(()) => {
                    self.stats.increment_requests_enqueued();
                    self.state.notify_one();
                }
                Err(e) => {
                    self.state.request_finished();
                    debug!("Scheduler refused a request from {}: {}", url, e);
                }
            }
        }

        for mut item in items {
            item.stamp(spider_name, url);
            self.stats.increment_items_scraped();
            self.admit_item(item);
        }
    }

    fn admit_item(&self, item: StrictItem) {
        match self.pipeline.enqueue_with_backpressure(item) {
            Ok(Admission::Enqueued) => {
                self.stats.increment_items_enqueued();
                self.state.notify_one();
            }
            Ok(Admission::Filtered) => self.stats.increment_items_filtered(),
            Err(e) => {
                self.stats.increment_items_rejected();
                warn!("Item rejected by the pipeline: {}", e);
            }
        }
    }

    /// Processes one pending item, if any. Returns whether one was processed.
    fn process_pending(&self) -> bool {
        match self.pipeline.try_process_next() {
            Ok(processed) => processed,
            Err(e) => {
                trace!("Worker {} could not process a pending item: {}", self.id, e);
                false
            }
        }
    }
}
