//! Contains the fetch logic of a single crawl cycle.
//!
//! A fetch runs the request chain, performs the transport call and runs the response chain.
//! Whatever fails along the way (a middleware or the transport) is offered to the exception
//! chain, which may replace the error or suppress it. A suppressed failure drops the cycle
//! without an error; anything else is returned to the worker as a typed error.

use crate::crawler::MiddlewareManager;
use crate::downloader::Downloader;
use crate::error::SpiderError;
use crate::request::Request;
use crate::response::Response;
use crate::stats::StatCollector;
use std::sync::Arc;
use tracing::{debug, trace};

/// Wraps the transport call of a request with the middleware chains.
#[derive(Clone)]
pub struct Fetcher {
    downloader: Arc<dyn Downloader>,
    middlewares: Arc<MiddlewareManager>,
    stats: Arc<StatCollector>,
}

impl Fetcher {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        middlewares: Arc<MiddlewareManager>,
        stats: Arc<StatCollector>,
    ) -> Self {
        Fetcher {
            downloader,
            middlewares,
            stats,
        }
    }

    /// Fetches `request`.
    ///
    /// Returns `Ok(None)` when an exception middleware suppressed a failure.
    pub fn fetch(&self, mut request: Request) -> Result<Option<Response>, SpiderError> {
        if let Err(e) = self.middlewares.process_request(&mut request) {
            return self.recover(e);
        }

        trace!("Sending request to {}", request.url);
        self.stats.increment_requests_sent();
        let mut response = match self.downloader.download(&request) {
            Ok(response) => response,
            Err(e) => {
                debug!("Download error for URL {}: {}", request.url, e);
                return self.recover(e);
            }
        };
        self.stats
            .record_response(response.status, response.body.len());

        if let Err(e) = self.middlewares.process_response(&mut response) {
            return self.recover(e);
        }

        self.stats.increment_requests_succeeded();
        Ok(Some(response))
    }

    fn recover(&self, error: SpiderError) -> Result<Option<Response>, SpiderError> {
        match self.middlewares.process_exception(error) {
            Some(error) => {
                self.stats.increment_requests_failed();
                Err(error)
            }
            None => {
                self.stats.increment_requests_dropped();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ParseOutput;
    use crate::middleware::{
        Capability, ExceptionAction, ExceptionMiddleware, HttpErrorMiddleware, Middleware,
        MiddlewareConfig, RequestMiddleware,
    };
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    /// Answers with the status stored in the `status` meta key, or fails for `/down`.
    struct Scripted;

    impl Downloader for Scripted {
        fn download(&self, request: &Request) -> Result<Response, SpiderError> {
            if request.url.path() == "/down" {
                return Err(SpiderError::transport(request.url.as_str(), "connection refused"));
            }
            let status = request
                .meta("status")
                .and_then(|v| v.as_u64())
                .unwrap_or(200) as u16;
            Ok(Response::new(
                request.url.clone(),
                status,
                HashMap::new(),
                b"<html></html>".to_vec(),
                request.clone(),
                "HTTP/1.1",
            ))
        }
    }

    struct Stamp;

    impl RequestMiddleware for Stamp {
        fn process_request(&self, request: &mut Request) -> Result<(), SpiderError> {
            request.headers.insert("X-Stamp".into(), "1".into());
            Ok(())
        }
    }

    impl Middleware for Stamp {
        fn capabilities(self: Arc<Self>) -> Vec<Capability> {
            vec![Capability::Request(self)]
        }
    }

    struct SwallowTransport;

    impl ExceptionMiddleware for SwallowTransport {
        fn process_exception(&self, error: &SpiderError) -> ExceptionAction {
            match error {
                SpiderError::Transport { .. } => ExceptionAction::Suppress,
                _ => ExceptionAction::Continue,
            }
        }
    }

    impl Middleware for SwallowTransport {
        fn capabilities(self: Arc<Self>) -> Vec<Capability> {
            vec![Capability::Exception(self)]
        }
    }

    fn fetcher(middlewares: MiddlewareManager) -> (Fetcher, Arc<StatCollector>) {
        let stats = Arc::new(StatCollector::new());
        let fetcher = Fetcher::new(Arc::new(Scripted), Arc::new(middlewares), Arc::clone(&stats));
        (fetcher, stats)
    }

    fn request(path: &str) -> Request {
        Request::get(&format!("https://example.com{}", path), |_| Ok(ParseOutput::new())).unwrap()
    }

    #[test]
    fn response_snapshot_reflects_request_middlewares() {
        let middlewares = MiddlewareManager::new();
        middlewares
            .register(Stamp, MiddlewareConfig::new("stamp"))
            .unwrap();
        let (fetcher, stats) = fetcher(middlewares);

        let response = fetcher.fetch(request("/ok")).unwrap().unwrap();
        assert_eq!(response.request().header("X-Stamp"), Some("1"));
        assert_eq!(stats.requests_succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(stats.total_bytes_downloaded.load(Ordering::SeqCst), 13);
    }

    #[test]
    fn transport_failures_surface_as_typed_errors() {
        let (fetcher, stats) = fetcher(MiddlewareManager::new());
        let err = fetcher.fetch(request("/down")).unwrap_err();
        assert!(matches!(err, SpiderError::Transport { .. }));
        assert_eq!(stats.requests_failed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.responses_received.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn suppressed_failures_drop_the_cycle() {
        let middlewares = MiddlewareManager::new();
        middlewares
            .register(SwallowTransport, MiddlewareConfig::new("swallow"))
            .unwrap();
        let (fetcher, stats) = fetcher(middlewares);

        assert!(fetcher.fetch(request("/down")).unwrap().is_none());
        assert_eq!(stats.requests_dropped.load(Ordering::SeqCst), 1);
        assert_eq!(stats.requests_failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn response_middleware_failures_are_annotated() {
        let middlewares = MiddlewareManager::new();
        middlewares
            .register(HttpErrorMiddleware::new(), MiddlewareConfig::new("http_error"))
            .unwrap();
        let (fetcher, stats) = fetcher(middlewares);

        let mut failing = request("/missing");
        failing.meta.insert("status".into(), 404.into());
        let err = fetcher.fetch(failing).unwrap_err();
        assert_eq!(
            err.to_string(),
            "middleware 'http_error' failed: unexpected HTTP status 404 for https://example.com/missing"
        );
        assert_eq!(stats.snapshot().response_status_counts.get(&404), Some(&1));
    }
}
