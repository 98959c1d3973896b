//! # Scheduler Module
//!
//! Implements the request frontier shared by every worker.
//!
//! ## Overview
//!
//! The `Scheduler` is a thread-safe FIFO of pending [`Request`]s. Workers dequeue from it and
//! re-enqueue the requests their callbacks discover, concurrently and without a global lock:
//! the queue is a lock-free `SegQueue`.
//!
//! FIFO order is the only ordering guarantee. `len` and `is_empty` are momentary snapshots and
//! must not be used as a synchronization barrier; the engine tracks outstanding work in
//! [`CrawlerState`](crate::state::CrawlerState) for that.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::Scheduler;
//!
//! let scheduler = Scheduler::new();
//! scheduler.enqueue_request(request)?;
//! while let Some(request) = scheduler.dequeue_request() {
//!     // fetch it
//! }
//! ```

use crate::error::SpiderError;
use crate::request::Request;
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

#[derive(Default)]
pub struct Scheduler {
    request_queue: SegQueue<Request>,
    is_shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `request` and makes it visible to a future dequeue.
    ///
    /// Fails only after [`shutdown`](Self::shutdown).
    pub fn enqueue_request(&self, request: Request) -> Result<(), SpiderError> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            debug!("Scheduler is shut down, rejecting request: {}", request.url);
            return Err(SpiderError::GeneralError(format!(
                "Scheduler is shut down, request rejected: {}",
                request.url
            )));
        }
        trace!("Enqueuing request: {}", request.url);
        self.request_queue.push(request);
        Ok(())
    }

    /// Removes and returns the oldest queued request, or `None` if the queue is currently empty.
    pub fn dequeue_request(&self) -> Option<Request> {
        let request = self.request_queue.pop();
        if let Some(req) = &request {
            trace!("Dequeued request: {}", req.url);
        }
        request
    }

    /// Refuses every further enqueue. Already queued requests stay dequeuable.
    pub fn shutdown(&self) {
        if !self.is_shutting_down.swap(true, Ordering::SeqCst) {
            debug!(
                "Scheduler shut down with {} pending requests",
                self.request_queue.len()
            );
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Number of queued requests at the time of the call.
    #[inline]
    pub fn len(&self) -> usize {
        self.request_queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.request_queue.is_empty()
    }
}
