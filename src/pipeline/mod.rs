//! # Item Pipeline Module
//!
//! Bounded producer/consumer queue for scraped records.
//!
//! ## Overview
//!
//! Workers push [`StrictItem`](crate::item::StrictItem)s into an [`ItemPipeline`]; any thread
//! may pull them back out and run them through the configured processors. Admission is
//! guarded by validators and filters, capacity is enforced with blocking or non-blocking
//! enqueues, and every hop is counted in [`PipelineStats`].
//!
//! ## Key Components
//!
//! - **ItemPipeline**: the queue itself, cheap to clone and share between threads
//! - **PipelineConfig**: capacity, maximum enqueue wait and auto-flush threshold
//! - **PipelineCallbacks**: optional hooks fired on enqueue, dequeue, processing, full and empty
//! - **ItemProcessor**: the processing step; closures and the built-in writers implement it

mod callbacks;
mod item_pipeline;
mod processor;
mod stats;

pub use callbacks::PipelineCallbacks;
pub use item_pipeline::{ItemPipeline, PipelineConfig};
pub use processor::{ConsoleWriter, ItemProcessor, JsonLinesWriter};
pub use stats::PipelineStats;

pub(crate) use item_pipeline::Admission;
