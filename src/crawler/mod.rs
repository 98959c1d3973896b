//! # Crawler Module
//!
//! Implements the crawl engine.
//!
//! ## Overview
//!
//! The crawler module provides the `Crawler` struct and the components it drives. A fixed pool
//! of worker threads shares one scheduler and one item pipeline; each worker runs the complete
//! fetch, parse and enqueue cycle for one request at a time.
//!
//! ## Key Components
//!
//! - **Crawler**: the engine that owns a run from seeding to the final statistics
//! - **Fetcher**: wraps the transport call with the middleware chains
//! - **MiddlewareManager**: keeps the request, response and exception chains in priority order
//!
//! ## Internal Components
//!
//! - `Worker`: the loop run by each worker thread, including the termination check

mod core;
mod fetcher;
mod middleware_manager;
mod worker;

pub use core::Crawler;
pub use fetcher::Fetcher;
pub use middleware_manager::MiddlewareManager;
