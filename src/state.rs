//! Module for tracking the operational state of a crawl run.
//!
//! This module defines the `CrawlerState` struct, the bookkeeping the workers use to decide
//! when a crawl is over. It keeps:
//! - The number of outstanding requests: enqueued, or dequeued but whose cycle has not
//!   finished yet.
//! - The phase of the run.
//! - Whether a fatal error asked every worker to stop.
//!
//! A request is counted before it is pushed onto the scheduler and released only after its
//! callback's children and records have been enqueued. While any cycle is running the counter
//! is therefore non-zero, and "scheduler empty and nothing outstanding" really means no more
//! work can appear.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Lifecycle of a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Idle,
    /// Seed requests are being pushed onto the scheduler.
    Seeding,
    /// Workers are running.
    Running,
    /// Workers have exited; remaining items are being processed.
    Draining,
    Terminal,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlPhase::Idle => "idle",
            CrawlPhase::Seeding => "seeding",
            CrawlPhase::Running => "running",
            CrawlPhase::Draining => "draining",
            CrawlPhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Represents the shared state of the crawler's workers.
#[derive(Debug)]
pub struct CrawlerState {
    outstanding_requests: AtomicUsize,
    aborted: AtomicBool,
    phase: Mutex<CrawlPhase>,
    /// Paired with `activity`; signalled whenever new work may be available.
    wakeup: Condvar,
    activity: Mutex<()>,
}

impl Default for CrawlerState {
    fn default() -> Self {
        CrawlerState {
            outstanding_requests: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            phase: Mutex::new(CrawlPhase::Idle),
            wakeup: Condvar::new(),
            activity: Mutex::new(()),
        }
    }
}

impl CrawlerState {
    /// Creates a new, atomically reference-counted `CrawlerState`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn phase(&self) -> CrawlPhase {
        *self.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: CrawlPhase) {
        let mut current = self.phase.lock();
        trace!("Crawl phase {} -> {}", *current, phase);
        *current = phase;
    }

    /// Number of requests enqueued or in a cycle.
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding_requests.load(Ordering::SeqCst)
    }

    /// Must be called before the request becomes visible on the scheduler.
    pub(crate) fn request_scheduled(&self) {
        self.outstanding_requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases a request whose whole cycle has finished, or that never reached the scheduler.
    pub(crate) fn request_finished(&self) {
        let previous = self.outstanding_requests.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "outstanding request counter underflow");
        if previous == 1 {
            self.notify_all();
        }
    }

    /// Whether every scheduled request has finished its cycle.
    pub fn is_idle(&self) -> bool {
        self.outstanding_requests() == 0
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Asks every worker to stop at its next loop iteration.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify_all();
    }

    /// Wakes one idle worker after new work was enqueued.
    pub(crate) fn notify_one(&self) {
        let _guard = self.activity.lock();
        self.wakeup.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        let _guard = self.activity.lock();
        self.wakeup.notify_all();
    }

    /// Parks an idle worker until it is notified or `timeout` elapses.
    pub(crate) fn wait_for_work(&self, timeout: Duration) {
        let mut guard = self.activity.lock();
        self.wakeup.wait_for(&mut guard, timeout);
    }
}
