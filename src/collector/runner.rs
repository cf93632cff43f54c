use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use crate::{
    funnel::FunnelReceiver,
    identity::StationResolver,
    metrics::METRICS,
    schema::Sample,
    storage::Storage,
};

use super::batch::{BatchBuffer, BatchPolicy, FlushReason};

/// Totals of one collector run, returned when the funnel closes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectorSummary {
    pub samples: usize,
    pub flushes_count: usize,
    pub flushes_capacity: usize,
    pub flushes_deadline: usize,
    pub flushes_shutdown: usize,
    pub rows_written: u64,
    pub rows_dropped: u64,
}

impl CollectorSummary {
    pub fn flushes(&self) -> usize {
        self.flushes_count + self.flushes_capacity + self.flushes_deadline + self.flushes_shutdown
    }

    fn record_flush(&mut self, reason: FlushReason) {
        match reason {
            FlushReason::Count => self.flushes_count += 1,
            FlushReason::Capacity => self.flushes_capacity += 1,
            FlushReason::Deadline => self.flushes_deadline += 1,
            FlushReason::Shutdown => self.flushes_shutdown += 1,
        }
    }
}

/// Single consumer of the funnel.
///
/// This loop:
/// - Receives samples from all workers
/// - Resolves each sample's station
/// - Buffers the flattened rows
/// - Writes the buffer when a flush trigger fires
///
/// GUARANTEES:
/// - The buffer is only ever touched by this task
/// - Each buffered row is handed to storage at most once
/// - A failing storage call never stops the loop
///
/// The deadline is also armed as a timer, so a cycle whose
/// remaining stations never report is still written on time.
///
pub struct BatchCollector {
    storage: Arc<dyn Storage>,
    resolver: StationResolver,
    buffer: BatchBuffer,
    storage_timeout: Duration,
    summary: CollectorSummary,
}

impl BatchCollector {
    pub fn new(storage: Arc<dyn Storage>, policy: BatchPolicy, storage_timeout: Duration) -> Self {
        Self {
            resolver: StationResolver::new(storage.clone(), storage_timeout),
            storage,
            buffer: BatchBuffer::new(policy),
            storage_timeout,
            summary: CollectorSummary::default(),
        }
    }

    /// Runs until every funnel sender is gone, then writes what is left.
    pub async fn run(mut self, mut funnel: FunnelReceiver) -> CollectorSummary {
        loop {
            let deadline = self.buffer.deadline_at();

            tokio::select! {
                biased;

                received = funnel.recv() => match received {
                    Some(sample) => self.handle_sample(sample).await,
                    None => {
                        if !self.buffer.is_idle() {
                            self.flush(FlushReason::Shutdown).await;
                        }
                        break;
                    }
                },

                _ = wait_until(deadline) => self.flush(FlushReason::Deadline).await,
            }
        }

        log::info!("collector stopped: {:?}", self.summary);
        self.summary
    }

    async fn handle_sample(&mut self, sample: Sample) {
        self.buffer.start_sample(Instant::now());
        self.summary.samples += 1;
        METRICS.samples_collected.fetch_add(1, Ordering::Relaxed);

        let sample_id = sample.id;
        let fuels = sample.prices.len();

        match self.resolver.resolve(sample.identity()).await {
            Ok(station_id) => {
                let added = self.buffer.push_rows(sample.into_rows(station_id));
                METRICS.rows_buffered.fetch_add(added, Ordering::Relaxed);
                log::debug!("buffered {added} rows ({} in batch)", self.buffer.len());
            }
            Err(err) => {
                METRICS.identity_errors.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "could not resolve {} station at '{}' for sample {}, skipping {} prices: {}",
                    sample.brand,
                    sample.address,
                    sample_id,
                    fuels,
                    err
                );
            }
        }

        if let Some(reason) = self.buffer.finish_sample(Instant::now()) {
            self.flush(reason).await;
        }
    }

    async fn flush(&mut self, reason: FlushReason) {
        let processed = self.buffer.processed_samples();
        let rows = self.buffer.take();

        self.summary.record_flush(reason);
        METRICS.record_flush(reason);

        if rows.is_empty() {
            log::info!("flush ({reason}): no rows from {processed} samples");
            return;
        }

        let len = rows.len();
        let started = Instant::now();
        let result = tokio::time::timeout(self.storage_timeout, self.storage.create_samples(&rows)).await;

        match result {
            Ok(Ok(written)) => {
                self.summary.rows_written += written;
                METRICS.rows_written.fetch_add(written as usize, Ordering::Relaxed);
                log::info!(
                    "flush ({reason}): wrote {written}/{len} rows from {processed} samples in {} ms ({} stations known)",
                    started.elapsed().as_millis(),
                    self.resolver.cached()
                );
            }
            Ok(Err(err)) => self.drop_batch(reason, len, &err.to_string()),
            Err(_) => self.drop_batch(
                reason,
                len,
                &format!("no answer within {:?}", self.storage_timeout),
            ),
        }
    }

    fn drop_batch(&mut self, reason: FlushReason, len: usize, err: &str) {
        self.summary.rows_dropped += len as u64;
        METRICS.flush_errors.fetch_add(1, Ordering::Relaxed);
        METRICS.rows_dropped.fetch_add(len, Ordering::Relaxed);
        log::error!("flush ({reason}) failed, dropping {len} rows: {err}");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
