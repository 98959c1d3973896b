//! # Statistics Module
//!
//! Engine-level counters of a crawl run.
//!
//! ## Overview
//!
//! The `StatCollector` is shared by every worker and updated with atomic operations. It counts
//! what happens to requests (enqueued, sent, succeeded, failed, dropped), to responses
//! (received, status codes, bytes) and to the records the callbacks produce (scraped,
//! enqueued into the item pipeline, filtered, rejected). Item processing itself is counted by
//! the pipeline's own [`PipelineStats`](crate::pipeline::PipelineStats).
//!
//! After a run the engine logs the `Display` rendering of the collector.
//!
//! ## Example
//!
//! ```rust,ignore
//! let crawler = CrawlerBuilder::new().add_spider(MySpider).build()?;
//! let stats = crawler.get_stats();
//! crawler.start_crawl()?;
//! println!("{}", stats.to_json_string_pretty()?);
//! ```

use crate::error::SpiderError;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A point-in-time copy of every counter, used for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub requests_enqueued: usize,
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub requests_dropped: usize,
    pub responses_received: usize,
    pub response_status_counts: BTreeMap<u16, usize>,
    pub total_bytes_downloaded: usize,
    pub parse_errors: usize,
    pub items_scraped: usize,
    pub items_enqueued: usize,
    pub items_filtered: usize,
    pub items_rejected: usize,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    fn per_second(&self, count: usize) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            count as f64 / seconds
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;

        if self.total_bytes_downloaded >= MB {
            format!("{:.2} MB", self.total_bytes_downloaded as f64 / MB as f64)
        } else if self.total_bytes_downloaded >= KB {
            format!("{:.2} KB", self.total_bytes_downloaded as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes_downloaded)
        }
    }
}

/// Collects statistics about the crawler's operation.
#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,

    pub requests_enqueued: AtomicUsize,
    pub requests_sent: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,
    /// Requests whose failure an exception middleware suppressed.
    pub requests_dropped: AtomicUsize,

    pub responses_received: AtomicUsize,
    pub response_status_counts: DashMap<u16, usize>,
    pub total_bytes_downloaded: AtomicUsize,

    /// Callback invocations that returned a non-fatal error.
    pub parse_errors: AtomicUsize,

    pub items_scraped: AtomicUsize,
    pub items_enqueued: AtomicUsize,
    pub items_filtered: AtomicUsize,
    pub items_rejected: AtomicUsize,
}

impl StatCollector {
    pub(crate) fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_sent: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_dropped: AtomicUsize::new(0),
            responses_received: AtomicUsize::new(0),
            response_status_counts: DashMap::new(),
            total_bytes_downloaded: AtomicUsize::new(0),
            parse_errors: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_enqueued: AtomicUsize::new(0),
            items_filtered: AtomicUsize::new(0),
            items_rejected: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let response_status_counts = self
            .response_status_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_sent: self.requests_sent.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            requests_dropped: self.requests_dropped.load(Ordering::SeqCst),
            responses_received: self.responses_received.load(Ordering::SeqCst),
            response_status_counts,
            total_bytes_downloaded: self.total_bytes_downloaded.load(Ordering::SeqCst),
            parse_errors: self.parse_errors.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_enqueued: self.items_enqueued.load(Ordering::SeqCst),
            items_filtered: self.items_filtered.load(Ordering::SeqCst),
            items_rejected: self.items_rejected.load(Ordering::SeqCst),
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts a received response together with its status code and body size.
    pub(crate) fn record_response(&self, status_code: u16, bytes: usize) {
        self.responses_received.fetch_add(1, Ordering::SeqCst);
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
        self.total_bytes_downloaded
            .fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn increment_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_scraped(&self) {
        self.items_scraped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_enqueued(&self) {
        self.items_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_filtered(&self) {
        self.items_filtered.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_rejected(&self) {
        self.items_rejected.fetch_add(1, Ordering::SeqCst);
    }

    /// Converts a snapshot into a JSON string.
    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Converts a snapshot into a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed)?;
        writeln!(
            f,
            "  speed    : req/s: {:.2}, item/s: {:.2}",
            snapshot.per_second(snapshot.requests_sent),
            snapshot.per_second(snapshot.items_scraped)
        )?;
        writeln!(
            f,
            "  requests : enqueued: {}, sent: {}, ok: {}, fail: {}, drop: {}",
            snapshot.requests_enqueued,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_dropped
        )?;
        writeln!(
            f,
            "  response : received: {}, downloaded: {}, parse errors: {}",
            snapshot.responses_received,
            snapshot.formatted_bytes(),
            snapshot.parse_errors
        )?;
        writeln!(
            f,
            "  items    : scraped: {}, enqueued: {}, filtered: {}, rejected: {}",
            snapshot.items_scraped,
            snapshot.items_enqueued,
            snapshot.items_filtered,
            snapshot.items_rejected
        )?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .response_status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status   : {}", status_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_responses_by_status() {
        let stats = StatCollector::new();
        stats.record_response(200, 1500);
        stats.record_response(200, 500);
        stats.record_response(404, 0);
        stats.increment_requests_sent();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.responses_received, 3);
        assert_eq!(snapshot.total_bytes_downloaded, 2000);
        assert_eq!(snapshot.response_status_counts.get(&200), Some(&2));
        assert_eq!(snapshot.formatted_bytes(), "1.95 KB");

        let report = stats.to_string();
        assert!(report.contains("status   : 200: 2, 404: 1"));
        assert!(report.contains("sent: 1"));
    }

    #[test]
    fn json_export_contains_counters() {
        let stats = StatCollector::new();
        stats.increment_items_scraped();
        stats.increment_items_enqueued();
        let json: serde_json::Value = serde_json::from_str(&stats.to_json_string().unwrap()).unwrap();
        assert_eq!(json["items_scraped"], 1);
        assert_eq!(json["items_enqueued"], 1);
        assert_eq!(json["requests_failed"], 0);
    }
}
