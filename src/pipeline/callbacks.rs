use crate::error::PipelineError;
use crate::item::StrictItem;
use std::fmt;
use std::sync::Arc;

type ItemHook = Arc<dyn Fn(&StrictItem) + Send + Sync>;
type ProcessedHook = Arc<dyn Fn(&StrictItem, Option<&PipelineError>) + Send + Sync>;
type SignalHook = Arc<dyn Fn() + Send + Sync>;

/// Optional hooks fired by an [`ItemPipeline`](super::ItemPipeline).
///
/// `on_item_enqueued` runs while the queue lock is held and must not call back into the
/// pipeline. The other hooks run after the lock has been released.
#[derive(Clone, Default)]
pub struct PipelineCallbacks {
    pub(crate) on_item_enqueued: Option<ItemHook>,
    pub(crate) on_item_dequeued: Option<ItemHook>,
    pub(crate) on_item_processed: Option<ProcessedHook>,
    pub(crate) on_pipeline_full: Option<SignalHook>,
    pub(crate) on_pipeline_empty: Option<SignalHook>,
}

impl PipelineCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_item_enqueued(mut self, hook: impl Fn(&StrictItem) + Send + Sync + 'static) -> Self {
        self.on_item_enqueued = Some(Arc::new(hook));
        self
    }

    pub fn on_item_dequeued(mut self, hook: impl Fn(&StrictItem) + Send + Sync + 'static) -> Self {
        self.on_item_dequeued = Some(Arc::new(hook));
        self
    }

    /// Called after every processed item with the processing error, if any.
    pub fn on_item_processed(
        mut self,
        hook: impl Fn(&StrictItem, Option<&PipelineError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_item_processed = Some(Arc::new(hook));
        self
    }

    /// Called when a non-blocking enqueue finds the pipeline at capacity.
    pub fn on_pipeline_full(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_pipeline_full = Some(Arc::new(hook));
        self
    }

    /// Called when a non-blocking dequeue finds the pipeline empty.
    pub fn on_pipeline_empty(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_pipeline_empty = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for PipelineCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCallbacks")
            .field("on_item_enqueued", &self.on_item_enqueued.is_some())
            .field("on_item_dequeued", &self.on_item_dequeued.is_some())
            .field("on_item_processed", &self.on_item_processed.is_some())
            .field("on_pipeline_full", &self.on_pipeline_full.is_some())
            .field("on_pipeline_empty", &self.on_pipeline_empty.is_some())
            .finish()
    }
}
