//! The core Crawler implementation.
//!
//! This module defines the `Crawler` struct, the engine of a crawl run. It ties together the
//! scheduler, the fetcher with its middleware chains, the spiders and the item pipeline.
//!
//! A run goes through the phases of [`CrawlPhase`]: the spiders' seed requests are pushed onto
//! the scheduler, a fixed pool of worker threads drives the fetch/parse/enqueue cycle until no
//! work is left, the item pipeline is drained and closed, and the statistics are logged.

use crate::crawler::worker::Worker;
use crate::crawler::{Fetcher, MiddlewareManager};
use crate::downloader::Downloader;
use crate::error::SpiderError;
use crate::pipeline::ItemPipeline;
use crate::scheduler::Scheduler;
use crate::settings::SettingsStore;
use crate::spider::Spider;
use crate::state::{CrawlPhase, CrawlerState};
use crate::stats::StatCollector;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn, Dispatch};

/// The central orchestrator of a crawl run.
pub struct Crawler {
    spiders: Vec<Arc<dyn Spider>>,
    scheduler: Arc<Scheduler>,
    pipeline: ItemPipeline,
    middlewares: Arc<MiddlewareManager>,
    downloader: Arc<dyn Downloader>,
    settings: Arc<SettingsStore>,
    state: Arc<CrawlerState>,
    stats: Arc<StatCollector>,
    dispatch: Option<Dispatch>,
}

impl Crawler {
    pub(crate) fn new(
        spiders: Vec<Arc<dyn Spider>>,
        pipeline: ItemPipeline,
        middlewares: Arc<MiddlewareManager>,
        downloader: Arc<dyn Downloader>,
        settings: Arc<SettingsStore>,
        dispatch: Option<Dispatch>,
    ) -> Self {
        Crawler {
            spiders,
            scheduler: Arc::new(Scheduler::new()),
            pipeline,
            middlewares,
            downloader,
            settings,
            state: CrawlerState::new(),
            stats: Arc::new(StatCollector::new()),
            dispatch,
        }
    }

    /// Runs the crawl to completion.
    ///
    /// Returns the first fatal error a worker hit, a worker panic, or a seeding failure.
    pub fn start_crawl(self) -> Result<(), SpiderError> {
        match self.dispatch.clone() {
            Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || self.run()),
            None => self.run(),
        }
    }

    fn run(self) -> Result<(), SpiderError> {
        let worker_count = self.settings.get_int("spider.worker", 3);
        if worker_count <= 0 {
            return Err(SpiderError::Configuration(format!(
                "spider.worker must be greater than 0, got {}",
                worker_count
            )));
        }
        let worker_count = worker_count as usize;
        info!(
            "Crawler starting crawl with {} spiders and {} workers",
            self.spiders.len(),
            worker_count
        );

        self.state.set_phase(CrawlPhase::Seeding);
        if let Err(e) = self.seed() {
            error!("Failed to create start requests: {}", e);
            self.shutdown();
            return Err(e);
        }

        self.state.set_phase(CrawlPhase::Running);
        let mut first_error = None;
        let handles = match self.spawn_workers(worker_count) {
            Ok(handles) => handles,
            Err((handles, e)) => {
                error!("Failed to spawn worker thread: {}", e);
                self.state.abort();
                first_error = Some(SpiderError::Io(e));
                handles
            }
        };

        for (id, handle) in handles {
            let result = handle.join().unwrap_or_else(|_| {
                self.state.abort();
                Err(SpiderError::WorkerPanicked(id))
            });
            if let Err(e) = result {
                trace!("Worker {} returned an error: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        debug!("All workers exited");

        self.shutdown();

        match first_error {
            Some(e) => {
                error!("Crawl aborted: {}", e);
                Err(e)
            }
            None => {
                info!("Crawl finished successfully.");
                Ok(())
            }
        }
    }

    fn seed(&self) -> Result<(), SpiderError> {
        for spider in &self.spiders {
            let requests = Arc::clone(spider).start_requests()?;
            debug!(
                "Spider '{}' produced {} start requests",
                spider.name(),
                requests.len()
            );
            for mut request in requests {
                request.url.set_fragment(None);
                request.tag_provenance(Some(spider.name()), 0);
                self.state.request_scheduled();
                match self.scheduler.enqueue_request(request) {
                    Ok(()) => self.stats.increment_requests_enqueued(),
                    Err(e) => {
                        self.state.request_finished();
                        error!("Failed to enqueue initial request: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn spawn_workers(
        &self,
        count: usize,
    ) -> Result<
        Vec<(usize, JoinHandle<Result<(), SpiderError>>)>,
        (Vec<(usize, JoinHandle<Result<(), SpiderError>>)>, std::io::Error),
    > {
        let fetcher = Fetcher::new(
            Arc::clone(&self.downloader),
            Arc::clone(&self.middlewares),
            Arc::clone(&self.stats),
        );

        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let worker = Worker {
                id,
                scheduler: Arc::clone(&self.scheduler),
                pipeline: self.pipeline.clone(),
                fetcher: fetcher.clone(),
                state: Arc::clone(&self.state),
                stats: Arc::clone(&self.stats),
            };
            let state = Arc::clone(&self.state);
            let dispatch = self.dispatch.clone();

            let spawned = thread::Builder::new()
                .name(format!("spider-worker-{}", id))
                .spawn(move || {
                    let run = move || {
                        panic::catch_unwind(AssertUnwindSafe(|| worker.run())).unwrap_or_else(
                            |_| {
                                error!("Worker {} panicked", id);
                                state.abort();
                                Err(SpiderError::WorkerPanicked(id))
                            },
                        )
                    };
                    match dispatch {
                        Some(dispatch) => tracing::dispatcher::with_default(&dispatch, run),
                        None => run(),
                    }
                });

            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => return Err((handles, e)),
            }
        }
        trace!("Spawned {} workers", count);
        Ok(handles)
    }

    /// Drains and closes the item pipeline, then stops the scheduler.
    fn shutdown(&self) {
        self.state.set_phase(CrawlPhase::Draining);
        if let Err(e) = self.pipeline.flush() {
            warn!("Final item flush reported: {}", e);
        }
        self.pipeline.close();
        self.pipeline.join_background();

        info!("Closing item processors...");
        if let Err(e) = self.pipeline.close_processors() {
            error!("Failed to close item processors: {}", e);
        }
        self.scheduler.shutdown();

        let leftover = self.scheduler.len();
        if leftover > 0 {
            warn!("{} requests were left unprocessed", leftover);
        }
        self.state.set_phase(CrawlPhase::Terminal);

        info!("{}", self.stats);
        info!("Item pipeline: {}", self.pipeline.stats());
    }

    /// Returns a cloned Arc to the `StatCollector` instance used by this crawler.
    ///
    /// This allows programmatic access to the collected statistics at any time during or after
    /// the crawl.
    pub fn get_stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// A handle to the item pipeline, usable after the crawl consumed the crawler.
    pub fn pipeline(&self) -> ItemPipeline {
        self.pipeline.clone()
    }

    pub fn state(&self) -> Arc<CrawlerState> {
        Arc::clone(&self.state)
    }

    pub fn middlewares(&self) -> Arc<MiddlewareManager> {
        Arc::clone(&self.middlewares)
    }

    pub fn settings(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.settings)
    }
}
