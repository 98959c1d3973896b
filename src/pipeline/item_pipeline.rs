use super::callbacks::PipelineCallbacks;
use super::processor::ItemProcessor;
use super::stats::PipelineStats;
use crate::error::PipelineError;
use crate::item::StrictItem;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

type Validator = Box<dyn Fn(&StrictItem) -> Result<(), String> + Send + Sync>;
type Filter = Box<dyn Fn(&StrictItem) -> bool + Send + Sync>;

/// Capacity and flushing behaviour of an [`ItemPipeline`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of queued items. 0 means unbounded.
    pub max_size: usize,
    /// How long a blocking enqueue may wait for room. `None` waits indefinitely.
    pub max_wait: Option<Duration>,
    /// Queue depth that triggers a background drain-and-process pass. 0 disables it.
    pub auto_flush_size: usize,
}

impl PipelineConfig {
    pub fn bounded(max_size: usize) -> Self {
        PipelineConfig {
            max_size,
            ..Default::default()
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_auto_flush(mut self, auto_flush_size: usize) -> Self {
        self.auto_flush_size = auto_flush_size;
        self
    }
}

/// Outcome of an accepted enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Enqueued,
    /// A filter dropped the item; not an error.
    Filtered,
}

/// A refused enqueue. The item is handed back when the pipeline was merely full.
pub(crate) struct Rejected {
    pub(crate) error: PipelineError,
    pub(crate) item: Option<StrictItem>,
}

impl Rejected {
    fn new(error: PipelineError, item: Option<StrictItem>) -> Self {
        Rejected { error, item }
    }
}

struct QueueState {
    queue: VecDeque<StrictItem>,
    closed: bool,
    stats: PipelineStats,
}

#[derive(Default)]
struct Stages {
    processor: Option<Box<dyn ItemProcessor>>,
    processors: Vec<Box<dyn ItemProcessor>>,
    validators: Vec<Validator>,
    filters: Vec<Filter>,
}

impl Stages {
    /// The single processor wins over the chain when both are configured.
    fn process(&self, item: &mut StrictItem) -> Result<(), PipelineError> {
        if let Some(processor) = &self.processor {
            return processor.process_item(item);
        }
        for processor in &self.processors {
            if let Err(e) = processor.process_item(item) {
                debug!("Processor '{}' failed: {}", processor.name(), e);
                return Err(e);
            }
        }
        Ok(())
    }
}

struct Shared {
    config: PipelineConfig,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    stages: RwLock<Stages>,
    callbacks: RwLock<PipelineCallbacks>,
    flushing: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// A bounded (or unbounded) FIFO of scraped items with admission checks and statistics.
///
/// Cloning an `ItemPipeline` yields another handle to the same queue.
#[derive(Clone)]
pub struct ItemPipeline {
    shared: Arc<Shared>,
}

impl Default for ItemPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl ItemPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        ItemPipeline {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    closed: false,
                    stats: PipelineStats::default(),
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                stages: RwLock::new(Stages::default()),
                callbacks: RwLock::new(PipelineCallbacks::default()),
                flushing: AtomicBool::new(false),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Enqueues `item`, waiting for room if the pipeline is at capacity.
    ///
    /// Filtered items are dropped silently and reported as success.
    pub fn enqueue_item(&self, item: StrictItem) -> Result<(), PipelineError> {
        self.admit(item, true).map(|_| ()).map_err(|r| r.error)
    }

    /// Enqueues `item`, failing with [`PipelineError::Full`] instead of waiting.
    pub fn try_enqueue_item(&self, item: StrictItem) -> Result<(), PipelineError> {
        self.admit(item, false).map(|_| ()).map_err(|r| r.error)
    }

    /// Enqueues every item with the blocking variant, one result per item.
    pub fn batch_enqueue(
        &self,
        items: impl IntoIterator<Item = StrictItem>,
    ) -> Vec<Result<(), PipelineError>> {
        items
            .into_iter()
            .map(|item| self.enqueue_item(item))
            .collect()
    }

    pub(crate) fn admit(&self, item: StrictItem, blocking: bool) -> Result<Admission, Rejected> {
        if self.shared.state.lock().closed {
            return Err(Rejected::new(PipelineError::Closed, None));
        }
        if item.is_empty() {
            return Err(Rejected::new(
                PipelineError::ItemInvalid(format!(
                    "item of schema '{}' has no populated field",
                    item.schema().name()
                )),
                None,
            ));
        }

        {
            let stages = self.shared.stages.read();
            for validator in &stages.validators {
                if let Err(reason) = validator(&item) {
                    debug!("Item rejected by validator: {}", reason);
                    return Err(Rejected::new(PipelineError::ValidationFailed(reason), None));
                }
            }
            if stages.filters.iter().any(|filter| !filter(&item)) {
                trace!("Item dropped by filter");
                return Ok(Admission::Filtered);
            }
        }

        let callbacks = self.shared.callbacks.read().clone();
        let max_size = self.shared.config.max_size;
        let mut state = self.shared.state.lock();

        if max_size > 0 && state.queue.len() >= max_size {
            if !blocking {
                drop(state);
                trace!("Pipeline full, non-blocking enqueue refused");
                if let Some(hook) = &callbacks.on_pipeline_full {
                    hook();
                }
                return Err(Rejected::new(PipelineError::Full, Some(item)));
            }

            let deadline = self.shared.config.max_wait.map(|wait| Instant::now() + wait);
            trace!("Pipeline full, waiting for room (deadline: {:?})", deadline);
            while state.queue.len() >= max_size {
                if state.closed {
                    return Err(Rejected::new(PipelineError::Closed, None));
                }
                match deadline {
                    Some(deadline) => {
                        let timed_out = self
                            .shared
                            .not_full
                            .wait_until(&mut state, deadline)
                            .timed_out();
                        if timed_out && !state.closed && state.queue.len() >= max_size {
                            debug!("Pipeline still full after waiting, enqueue refused");
                            return Err(Rejected::new(PipelineError::Full, Some(item)));
                        }
                    }
                    None => self.shared.not_full.wait(&mut state),
                }
            }
        }
        if state.closed {
            return Err(Rejected::new(PipelineError::Closed, None));
        }

        state.queue.push_back(item);
        state.stats.total_enqueued += 1;
        let depth = state.queue.len();
        state.stats.current_size = depth;
        if let (Some(hook), Some(queued)) = (&callbacks.on_item_enqueued, state.queue.back()) {
            hook(queued);
        }
        self.shared.not_empty.notify_one();
        drop(state);

        trace!("Item enqueued, pipeline depth: {}", depth);
        let threshold = self.shared.config.auto_flush_size;
        if threshold > 0 && depth >= threshold {
            self.spawn_flush();
        }
        Ok(Admission::Enqueued)
    }

    /// Enqueues on behalf of a producer that can also consume.
    ///
    /// While the pipeline is full the caller processes pending items itself and retries, so a
    /// pool whose every thread produces items cannot stall on its own backlog. Once nothing is
    /// left to process it falls back to the blocking enqueue, which honors `max_wait`.
    pub(crate) fn enqueue_with_backpressure(
        &self,
        mut item: StrictItem,
    ) -> Result<Admission, PipelineError> {
        loop {
            let rejected = match self.admit(item, false) {
                Ok(admission) => return Ok(admission),
                Err(rejected) => rejected,
            };
            match (rejected.error, rejected.item) {
                (PipelineError::Full, Some(returned)) => {
                    if self.try_process_next()? {
                        item = returned;
                        continue;
                    }
                    trace!("Pipeline full with nothing to process, blocking enqueue");
                    return self.admit(returned, true).map_err(|r| r.error);
                }
                (error, _) => return Err(error),
            }
        }
    }

    /// Removes the oldest item, waiting until one is available.
    ///
    /// Fails with [`PipelineError::Closed`] once the pipeline is closed and empty.
    pub fn dequeue_item(&self) -> Result<StrictItem, PipelineError> {
        self.dequeue(true)?.ok_or(PipelineError::Closed)
    }

    /// Removes the oldest item, or returns `Ok(None)` if the pipeline is currently empty.
    pub fn try_dequeue_item(&self) -> Result<Option<StrictItem>, PipelineError> {
        self.dequeue(false)
    }

    /// Dequeues up to `count` items without waiting.
    pub fn batch_dequeue(&self, count: usize) -> Result<Vec<StrictItem>, PipelineError> {
        let mut items = Vec::with_capacity(count);
        while items.len() < count {
            match self.try_dequeue_item()? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    fn dequeue(&self, blocking: bool) -> Result<Option<StrictItem>, PipelineError> {
        let callbacks = self.shared.callbacks.read().clone();
        let mut state = self.shared.state.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                state.stats.total_dequeued += 1;
                state.stats.current_size = state.queue.len();
                self.shared.not_full.notify_one();
                drop(state);

                if let Some(hook) = &callbacks.on_item_dequeued {
                    hook(&item);
                }
                return Ok(Some(item));
            }
            if state.closed {
                return Err(PipelineError::Closed);
            }
            if !blocking {
                drop(state);
                if let Some(hook) = &callbacks.on_pipeline_empty {
                    hook();
                }
                return Ok(None);
            }
            self.shared.not_empty.wait(&mut state);
        }
    }

    /// Waits for the next item and processes it.
    pub fn process_next(&self) -> Result<(), PipelineError> {
        let item = self.dequeue_item()?;
        self.process_item(item)
    }

    /// Processes the next item if one is queued. Returns whether an item was processed;
    /// the processing error, if any, has already been recorded in the statistics.
    pub fn try_process_next(&self) -> Result<bool, PipelineError> {
        match self.try_dequeue_item()? {
            Some(item) => {
                if let Err(e) = self.process_item(item) {
                    warn!("Item processing failed: {}", e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn process_item(&self, mut item: StrictItem) -> Result<(), PipelineError> {
        let start = Instant::now();
        let result = self.shared.stages.read().process(&mut item);
        let elapsed = start.elapsed();

        self.shared
            .state
            .lock()
            .stats
            .record_processed(elapsed, result.is_err());

        let hook = self.shared.callbacks.read().on_item_processed.clone();
        if let Some(hook) = hook {
            hook(&item, result.as_ref().err());
        }
        result
    }

    /// Dequeues and processes items until the pipeline is empty.
    ///
    /// Processing errors do not stop the loop; a dequeue error does. The last error seen is
    /// returned.
    pub fn flush(&self) -> Result<(), PipelineError> {
        let mut last_error = None;
        let mut count = 0usize;
        loop {
            match self.try_dequeue_item() {
                Ok(Some(item)) => {
                    if let Err(e) = self.process_item(item) {
                        last_error = Some(e);
                    }
                    count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }
        trace!("Flush processed {} items", count);
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs a flush on a background thread unless one is already running.
    fn spawn_flush(&self) {
        if self.shared.flushing.swap(true, Ordering::SeqCst) {
            trace!("Background flush already running");
            return;
        }

        let pipeline = self.clone();
        let spawned = thread::Builder::new()
            .name("item-pipeline-flush".into())
            .spawn(move || loop {
                if let Err(e) = pipeline.flush() {
                    debug!("Background flush finished with error: {}", e);
                }
                pipeline.shared.flushing.store(false, Ordering::SeqCst);

                // A close that raced the flag still needs its backlog processed.
                let threshold = if pipeline.is_closed() {
                    1
                } else {
                    pipeline.shared.config.auto_flush_size.max(1)
                };
                if pipeline.size() < threshold
                    || pipeline.shared.flushing.swap(true, Ordering::SeqCst)
                {
                    break;
                }
            });

        match spawned {
            Ok(handle) => {
                let mut background = self.shared.background.lock();
                background.retain(|h| !h.is_finished());
                background.push(handle);
            }
            Err(e) => {
                self.shared.flushing.store(false, Ordering::SeqCst);
                error!("Failed to spawn background flush: {}", e);
            }
        }
    }

    /// Waits for every background flush started so far.
    pub fn join_background(&self) {
        let handles: Vec<JoinHandle<()>> = self.shared.background.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("A background flush thread panicked");
            }
        }
    }

    /// Closes the pipeline. Idempotent.
    ///
    /// Further enqueues fail with [`PipelineError::Closed`]; dequeues keep succeeding until the
    /// remaining items are gone, and those items are flushed in the background.
    pub fn close(&self) {
        let remaining = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.queue.len()
        };
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        debug!("Item pipeline closed with {} queued items", remaining);

        if remaining > 0 {
            self.spawn_flush();
        }
    }

    /// Empties the queue without processing and returns the discarded items.
    pub fn drain(&self) -> Vec<StrictItem> {
        let items: Vec<StrictItem> = {
            let mut state = self.shared.state.lock();
            let items = state.queue.drain(..).collect();
            state.stats.current_size = 0;
            items
        };
        self.shared.not_full.notify_all();
        debug!("Drained {} items without processing", items.len());
        items
    }

    /// Calls `close` on every configured processor.
    pub fn close_processors(&self) -> Result<(), PipelineError> {
        let stages = self.shared.stages.read();
        let mut last_error = None;
        for processor in stages.processor.iter().chain(stages.processors.iter()) {
            if let Err(e) = processor.close() {
                error!("Processor '{}' failed to close: {}", processor.name(), e);
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let max_size = self.shared.config.max_size;
        max_size > 0 && self.size() >= max_size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn stats(&self) -> PipelineStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.current_size = state.queue.len();
        stats
    }

    /// Zeroes the counters. Depth and the last processing time are kept.
    pub fn reset_stats(&self) {
        let mut state = self.shared.state.lock();
        state.stats = PipelineStats {
            current_size: state.queue.len(),
            last_process_time: state.stats.last_process_time,
            ..Default::default()
        };
    }

    /// Sets the single processor. When set, the processor chain is not used.
    pub fn set_processor(&self, processor: impl ItemProcessor) {
        self.shared.stages.write().processor = Some(Box::new(processor));
    }

    /// Appends a processor to the chain.
    pub fn add_processor(&self, processor: impl ItemProcessor) {
        self.shared.stages.write().processors.push(Box::new(processor));
    }

    /// Adds a validator. A validator error refuses the item with
    /// [`PipelineError::ValidationFailed`].
    pub fn add_validator<F>(&self, validator: F)
    where
        F: Fn(&StrictItem) -> Result<(), String> + Send + Sync + 'static,
    {
        self.shared.stages.write().validators.push(Box::new(validator));
    }

    /// Adds a filter. Items for which a filter returns `false` are dropped without error.
    pub fn add_filter<F>(&self, filter: F)
    where
        F: Fn(&StrictItem) -> bool + Send + Sync + 'static,
    {
        self.shared.stages.write().filters.push(Box::new(filter));
    }

    pub fn set_callbacks(&self, callbacks: PipelineCallbacks) {
        *self.shared.callbacks.write() = callbacks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemSchema;
    use crossbeam::channel::{self, Receiver, Sender};
    use std::sync::atomic::AtomicUsize;

    fn item(n: i64) -> StrictItem {
        let schema = ItemSchema::new("quote", ["n"]);
        StrictItem::new(&schema).with("n", n).unwrap()
    }

    fn n(item: &StrictItem) -> i64 {
        item.get("n").and_then(|v| v.as_i64()).unwrap()
    }

    #[test]
    fn enqueues_up_to_capacity_without_blocking() {
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(5));
        for i in 0..5 {
            pipeline.enqueue_item(item(i)).unwrap();
        }
        assert_eq!(pipeline.size(), 5);
        assert!(pipeline.is_full());
        assert_eq!(pipeline.stats().total_enqueued, 5);
    }

    #[test]
    fn non_blocking_enqueue_fails_fast_when_full() {
        let full_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(1));
        let calls = Arc::clone(&full_calls);
        pipeline.set_callbacks(PipelineCallbacks::new().on_pipeline_full(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }));

        pipeline.try_enqueue_item(item(1)).unwrap();
        assert!(matches!(
            pipeline.try_enqueue_item(item(2)),
            Err(PipelineError::Full)
        ));
        assert_eq!(full_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.size(), 1);
    }

    #[test]
    fn bounded_wait_fails_after_the_deadline_and_not_before() {
        let wait = Duration::from_millis(150);
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(1).with_max_wait(wait));
        pipeline.enqueue_item(item(1)).unwrap();

        let start = Instant::now();
        let result = pipeline.enqueue_item(item(2));
        assert!(matches!(result, Err(PipelineError::Full)));
        assert!(start.elapsed() >= wait);
    }

    #[test]
    fn blocked_producer_resumes_after_a_dequeue() {
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(1));
        pipeline.enqueue_item(item(1)).unwrap();

        let producer = {
            let pipeline = pipeline.clone();
            thread::spawn(move || pipeline.enqueue_item(item(2)))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(n(&pipeline.dequeue_item().unwrap()), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(n(&pipeline.dequeue_item().unwrap()), 2);
    }

    #[test]
    fn rejects_invalid_items() {
        let pipeline = ItemPipeline::default();
        let schema = ItemSchema::new("quote", ["n"]);
        assert!(matches!(
            pipeline.enqueue_item(StrictItem::new(&schema)),
            Err(PipelineError::ItemInvalid(_))
        ));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn failing_validator_refuses_the_item() {
        let pipeline = ItemPipeline::default();
        pipeline.add_validator(|_| Err("missing author".to_string()));
        let err = pipeline.enqueue_item(item(1)).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: missing author");
        assert_eq!(pipeline.size(), 0);
        assert_eq!(pipeline.stats().total_enqueued, 0);
    }

    #[test]
    fn validators_stop_at_the_first_failure() {
        let second_ran = Arc::new(AtomicBool::new(false));
        let pipeline = ItemPipeline::default();
        pipeline.add_validator(|_| Err("first".to_string()));
        let flag = Arc::clone(&second_ran);
        pipeline.add_validator(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        let err = pipeline.try_enqueue_item(item(1)).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: first");
        assert!(!second_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn rejecting_filter_drops_silently() {
        let pipeline = ItemPipeline::default();
        pipeline.add_filter(|item| n(item) % 2 == 0);
        pipeline.enqueue_item(item(1)).unwrap();
        pipeline.enqueue_item(item(2)).unwrap();
        assert_eq!(pipeline.size(), 1);
        assert_eq!(pipeline.stats().total_enqueued, 1);
    }

    #[test]
    fn close_rejects_producers_but_drains_backlog() {
        let pipeline = ItemPipeline::default();
        pipeline.enqueue_item(item(1)).unwrap();
        pipeline.enqueue_item(item(2)).unwrap();

        pipeline.close();
        pipeline.close();
        assert!(pipeline.is_closed());
        assert!(matches!(
            pipeline.enqueue_item(item(3)),
            Err(PipelineError::Closed)
        ));
        assert!(matches!(
            pipeline.try_enqueue_item(item(3)),
            Err(PipelineError::Closed)
        ));

        pipeline.join_background();
        assert!(matches!(
            pipeline.try_dequeue_item(),
            Err(PipelineError::Closed)
        ));
        assert!(matches!(pipeline.dequeue_item(), Err(PipelineError::Closed)));
        assert_eq!(pipeline.stats().total_processed, 2);
    }

    /// Parks the background flush thread the first time it calls the returned hook, until
    /// `release` is signalled.
    struct FlushGate {
        reached: Receiver<()>,
        release: Sender<()>,
    }

    fn flush_gate() -> (FlushGate, impl Fn() + Send + Sync + 'static) {
        let (reached_tx, reached) = channel::bounded(1);
        let (release, release_rx) = channel::bounded(1);
        let parked = AtomicBool::new(false);
        let hook = move || {
            if thread::current().name() == Some("item-pipeline-flush")
                && !parked.swap(true, Ordering::SeqCst)
            {
                reached_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            }
        };
        (FlushGate { reached, release }, hook)
    }

    #[test]
    fn dequeue_after_close_returns_remaining_items_first() {
        let pipeline = ItemPipeline::default();
        let (gate, park) = flush_gate();
        pipeline.set_callbacks(PipelineCallbacks::new().on_item_dequeued(move |_| park()));
        pipeline.enqueue_item(item(7)).unwrap();
        pipeline.enqueue_item(item(8)).unwrap();

        pipeline.close();
        // The background flush holds item 7; item 8 is still queued.
        gate.reached.recv().unwrap();
        assert!(matches!(
            pipeline.try_enqueue_item(item(9)),
            Err(PipelineError::Closed)
        ));
        assert_eq!(n(&pipeline.dequeue_item().unwrap()), 8);
        assert!(matches!(pipeline.dequeue_item(), Err(PipelineError::Closed)));

        gate.release.send(()).unwrap();
        pipeline.join_background();
        assert_eq!(pipeline.stats().total_processed, 1);
    }

    #[test]
    fn close_during_a_background_flush_still_flushes_the_backlog() {
        let pipeline = ItemPipeline::new(PipelineConfig::default().with_auto_flush(2));
        let (gate, park) = flush_gate();
        pipeline.set_callbacks(PipelineCallbacks::new().on_pipeline_empty(park));

        pipeline.enqueue_item(item(1)).unwrap();
        pipeline.enqueue_item(item(2)).unwrap();
        // The flush emptied the queue but has not cleared its running flag yet.
        gate.reached.recv().unwrap();

        pipeline.enqueue_item(item(3)).unwrap();
        pipeline.close();
        gate.release.send(()).unwrap();
        pipeline.join_background();

        assert_eq!(pipeline.size(), 0);
        assert_eq!(pipeline.stats().total_processed, 3);
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let pipeline = ItemPipeline::default();
        let consumer = {
            let pipeline = pipeline.clone();
            thread::spawn(move || pipeline.dequeue_item())
        };
        thread::sleep(Duration::from_millis(50));
        pipeline.close();
        assert!(matches!(
            consumer.join().unwrap(),
            Err(PipelineError::Closed)
        ));
    }

    #[test]
    fn close_wakes_blocked_producers() {
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(1));
        pipeline.enqueue_item(item(1)).unwrap();
        let producer = {
            let pipeline = pipeline.clone();
            thread::spawn(move || pipeline.enqueue_item(item(2)))
        };
        thread::sleep(Duration::from_millis(50));
        pipeline.close();
        assert!(matches!(
            producer.join().unwrap(),
            Err(PipelineError::Closed)
        ));
        pipeline.join_background();
    }

    #[test]
    fn try_dequeue_on_empty_fires_the_empty_hook() {
        let empties = Arc::new(AtomicUsize::new(0));
        let pipeline = ItemPipeline::default();
        let counter = Arc::clone(&empties);
        pipeline.set_callbacks(PipelineCallbacks::new().on_pipeline_empty(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(pipeline.try_dequeue_item().unwrap().is_none());
        assert_eq!(empties.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_processor_takes_precedence_over_the_chain() {
        let chain_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = ItemPipeline::default();
        let calls = Arc::clone(&chain_calls);
        pipeline.add_processor(move |_: &mut StrictItem| -> Result<(), PipelineError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        pipeline.set_processor(|_: &mut StrictItem| -> Result<(), PipelineError> { Ok(()) });

        pipeline.enqueue_item(item(1)).unwrap();
        pipeline.process_next().unwrap();
        assert_eq!(chain_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn chain_stops_at_first_failure_and_counts_it() {
        let third_ran = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ItemPipeline::default();

        pipeline.add_processor(|item: &mut StrictItem| -> Result<(), PipelineError> {
            item.set("n", 100)?;
            Ok(())
        });
        pipeline.add_processor(|_: &mut StrictItem| -> Result<(), PipelineError> {
            Err(PipelineError::ProcessingFailed("store unavailable".into()))
        });
        let flag = Arc::clone(&third_ran);
        pipeline.add_processor(move |_: &mut StrictItem| -> Result<(), PipelineError> {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        let seen = Arc::clone(&processed);
        pipeline.set_callbacks(PipelineCallbacks::new().on_item_processed(move |item, err| {
            seen.lock().push((n(item), err.map(ToString::to_string)));
        }));

        pipeline.enqueue_item(item(1)).unwrap();
        assert!(pipeline.process_next().is_err());
        assert!(!third_ran.load(Ordering::SeqCst));

        let stats = pipeline.stats();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(
            processed.lock().as_slice(),
            [(100, Some("processing failed: store unavailable".to_string()))]
        );
    }

    #[test]
    fn flush_keeps_going_after_processing_errors() {
        let pipeline = ItemPipeline::default();
        pipeline.add_processor(|item: &mut StrictItem| -> Result<(), PipelineError> {
            if n(item) == 2 {
                Err(PipelineError::ProcessingFailed("bad item".into()))
            } else {
                Ok(())
            }
        });
        for i in 1..=4 {
            pipeline.enqueue_item(item(i)).unwrap();
        }
        assert!(pipeline.flush().is_err());
        assert!(pipeline.is_empty());
        let stats = pipeline.stats();
        assert_eq!(stats.total_processed, 4);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_dequeued, 4);
    }

    #[test]
    fn auto_flush_drains_in_the_background() {
        let processed = Arc::new(AtomicUsize::new(0));
        let pipeline = ItemPipeline::new(PipelineConfig::default().with_auto_flush(3));
        let counter = Arc::clone(&processed);
        pipeline.add_processor(move |_: &mut StrictItem| -> Result<(), PipelineError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for i in 0..3 {
            pipeline.enqueue_item(item(i)).unwrap();
        }
        pipeline.join_background();
        assert_eq!(processed.load(Ordering::SeqCst), 3);
        assert!(pipeline.is_empty());
    }

    #[test]
    fn drain_discards_and_frees_room() {
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(2));
        pipeline.enqueue_item(item(1)).unwrap();
        pipeline.enqueue_item(item(2)).unwrap();
        let drained = pipeline.drain();
        assert_eq!(drained.iter().map(n).collect::<Vec<_>>(), [1, 2]);
        assert!(pipeline.try_enqueue_item(item(3)).is_ok());
        assert_eq!(pipeline.stats().total_processed, 0);
    }

    #[test]
    fn batch_dequeue_and_reset_stats() {
        let pipeline = ItemPipeline::default();
        let results = pipeline.batch_enqueue((0..4).map(item));
        assert!(results.iter().all(Result::is_ok));

        let batch = pipeline.batch_dequeue(3).unwrap();
        assert_eq!(batch.iter().map(n).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(pipeline.batch_dequeue(10).unwrap().len(), 1);

        pipeline.reset_stats();
        let stats = pipeline.stats();
        assert_eq!(stats.total_enqueued, 0);
        assert_eq!(stats.total_dequeued, 0);
    }

    #[test]
    fn enqueue_and_dequeue_hooks_fire() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ItemPipeline::default();
        let (on_in, on_out) = (Arc::clone(&events), Arc::clone(&events));
        pipeline.set_callbacks(
            PipelineCallbacks::new()
                .on_item_enqueued(move |item| on_in.lock().push(format!("in {}", n(item))))
                .on_item_dequeued(move |item| on_out.lock().push(format!("out {}", n(item)))),
        );
        pipeline.enqueue_item(item(1)).unwrap();
        pipeline.try_dequeue_item().unwrap();
        assert_eq!(events.lock().as_slice(), ["in 1", "out 1"]);
    }

    #[test]
    fn backpressure_processes_inline_instead_of_blocking() {
        let processed = Arc::new(AtomicUsize::new(0));
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(2));
        let counter = Arc::clone(&processed);
        pipeline.add_processor(move |_: &mut StrictItem| -> Result<(), PipelineError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for i in 0..5 {
            assert_eq!(
                pipeline.enqueue_with_backpressure(item(i)).unwrap(),
                Admission::Enqueued
            );
        }
        assert_eq!(processed.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.size(), 2);

        pipeline.add_filter(|_| false);
        assert_eq!(
            pipeline.enqueue_with_backpressure(item(9)).unwrap(),
            Admission::Filtered
        );
    }

    #[test]
    fn concurrent_producers_and_consumers_balance() {
        let pipeline = ItemPipeline::new(PipelineConfig::bounded(4));
        let producers: Vec<_> = (0..3)
            .map(|p| {
                let pipeline = pipeline.clone();
                thread::spawn(move || {
                    for i in 0..30 {
                        pipeline.enqueue_item(item(p * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let pipeline = pipeline.clone();
                thread::spawn(move || {
                    let mut taken = 0;
                    while taken < 45 {
                        pipeline.process_next().unwrap();
                        taken += 1;
                    }
                })
            })
            .collect();
        for handle in producers.into_iter().chain(consumers) {
            handle.join().unwrap();
        }
        let stats = pipeline.stats();
        assert_eq!(stats.total_enqueued, 90);
        assert_eq!(stats.total_processed, 90);
        assert_eq!(stats.current_size, 0);
    }
}
