use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

use crate::collector::batch::FlushReason;

/// Global runtime metrics for the ingestion pipeline.
///
/// Purpose:
/// - Track dispatch throughput (ticks, scrapes, failures)
/// - Track collector throughput (samples, rows, flushes per trigger)
/// - Track storage failures
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Dispatcher
    pub ticks: AtomicUsize,
    pub scrapes_ok: AtomicUsize,
    pub scrape_errors: AtomicUsize,
    pub scrape_timeouts: AtomicUsize,

    // Collector
    pub samples_collected: AtomicUsize,
    pub rows_buffered: AtomicUsize,
    pub rows_written: AtomicUsize,

    pub flushes_count: AtomicUsize,
    pub flushes_capacity: AtomicUsize,
    pub flushes_deadline: AtomicUsize,
    pub flushes_shutdown: AtomicUsize,

    // Storage
    pub identity_errors: AtomicUsize,
    pub flush_errors: AtomicUsize,
    pub rows_dropped: AtomicUsize,
}

impl RuntimeMetrics {
    pub fn record_flush(&self, reason: FlushReason) {
        let counter = match reason {
            FlushReason::Count => &self.flushes_count,
            FlushReason::Capacity => &self.flushes_capacity,
            FlushReason::Deadline => &self.flushes_deadline,
            FlushReason::Shutdown => &self.flushes_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line summary for the periodic reporter.
    pub fn summary(&self) -> String {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        format!(
            "ticks={} scraped={} scrape_err={} scrape_timeout={} samples={} buffered={} written={} \
             flush[count={} capacity={} deadline={} shutdown={}] identity_err={} flush_err={} dropped={}",
            load(&self.ticks),
            load(&self.scrapes_ok),
            load(&self.scrape_errors),
            load(&self.scrape_timeouts),
            load(&self.samples_collected),
            load(&self.rows_buffered),
            load(&self.rows_written),
            load(&self.flushes_count),
            load(&self.flushes_capacity),
            load(&self.flushes_deadline),
            load(&self.flushes_shutdown),
            load(&self.identity_errors),
            load(&self.flush_errors),
            load(&self.rows_dropped),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_flush_bumps_the_matching_counter() {
        let metrics = RuntimeMetrics::default();
        metrics.record_flush(FlushReason::Deadline);
        metrics.record_flush(FlushReason::Deadline);
        metrics.record_flush(FlushReason::Count);

        assert_eq!(metrics.flushes_deadline.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.flushes_count.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.flushes_capacity.load(Ordering::Relaxed), 0);
        assert!(metrics.summary().contains("flush[count=1 capacity=0 deadline=2 shutdown=0]"));
    }
}
