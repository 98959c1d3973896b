use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Counters of an [`ItemPipeline`](super::ItemPipeline).
///
/// The totals only ever grow (until `reset_stats`). `current_size` is a point-in-time reading
/// taken when the snapshot was made.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub current_size: usize,
    /// Simple moving average over every processed item.
    pub avg_process_time: Duration,
    pub last_process_time: Option<DateTime<Utc>>,
}

impl PipelineStats {
    /// Folds one processing sample into the running average.
    pub(crate) fn record_processed(&mut self, elapsed: Duration, failed: bool) {
        self.total_processed += 1;
        if failed {
            self.total_failed += 1;
        }

        let n = u128::from(self.total_processed);
        self.avg_process_time = if n == 1 {
            elapsed
        } else {
            let total = self.avg_process_time.as_nanos() * (n - 1) + elapsed.as_nanos();
            Duration::from_nanos((total / n) as u64)
        };
        self.last_process_time = Some(Utc::now());
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enqueued: {}, dequeued: {}, processed: {}, failed: {}, depth: {}, avg: {:?}",
            self.total_enqueued,
            self.total_dequeued,
            self.total_processed,
            self.total_failed,
            self.current_size,
            self.avg_process_time
        )
    }
}
