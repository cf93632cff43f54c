use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::schema::SampleRow;

/// Rows preallocated per cycle; larger batches grow on demand.
const INITIAL_ROWS: usize = 1024;

/// Granularity of the tokio timer.
const DEADLINE_RESOLUTION: Duration = Duration::from_millis(1);

/// Why a batch was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Every configured station delivered a sample this cycle
    Count,
    /// The buffer crossed its fill threshold
    Capacity,
    /// The cycle is older than the flush deadline
    Deadline,
    /// The funnel closed
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushReason::Count => "count",
            FlushReason::Capacity => "capacity",
            FlushReason::Deadline => "deadline",
            FlushReason::Shutdown => "shutdown",
        })
    }
}

/// Flush thresholds of the collector.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    /// Buffer capacity in rows
    pub capacity: usize,
    /// Capacity trigger, in percent of `capacity`
    pub threshold_percent: usize,
    /// Maximum age of a cycle, measured from its first sample
    pub deadline: Duration,
    /// Samples expected per cycle (the configured station count)
    pub expected_samples: usize,
}

/// Row buffer plus the per-cycle bookkeeping behind the flush triggers.
///
/// A cycle starts with the first sample after a flush (Idle -> Accumulating)
/// and ends with `take`, which hands out the rows exactly once and
/// resets the cycle.
#[derive(Debug)]
pub struct BatchBuffer {
    policy: BatchPolicy,
    rows: Vec<SampleRow>,
    processed_samples: usize,
    first_sample_at: Option<Instant>,
}

impl BatchBuffer {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            rows: Vec::with_capacity(policy.capacity.min(INITIAL_ROWS)),
            policy,
            processed_samples: 0,
            first_sample_at: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.first_sample_at.is_none()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    /// Marks the arrival of a sample; the first one opens the cycle.
    pub fn start_sample(&mut self, now: Instant) {
        if self.first_sample_at.is_none() {
            self.first_sample_at = Some(now);
        }
    }

    /// Appends the rows of the current sample, returns how many were added.
    pub fn push_rows(&mut self, rows: impl IntoIterator<Item = SampleRow>) -> usize {
        let before = self.rows.len();
        self.rows.extend(rows);
        self.rows.len() - before
    }

    /// Closes the current sample and evaluates the triggers.
    pub fn finish_sample(&mut self, now: Instant) -> Option<FlushReason> {
        self.processed_samples += 1;
        self.trigger(now)
    }

    /// First satisfied trigger in priority order: count, capacity, deadline.
    pub fn trigger(&self, now: Instant) -> Option<FlushReason> {
        let first = self.first_sample_at?;

        if self.policy.expected_samples > 0 && self.processed_samples >= self.policy.expected_samples {
            return Some(FlushReason::Count);
        }
        // len >= threshold% * capacity, in integers
        let filled = self.rows.len().saturating_mul(100);
        if filled >= self.policy.capacity.saturating_mul(self.policy.threshold_percent) {
            return Some(FlushReason::Capacity);
        }
        if now.saturating_duration_since(first) > self.policy.deadline {
            return Some(FlushReason::Deadline);
        }
        None
    }

    /// First instant at which the running cycle is past its deadline,
    /// i.e. where `trigger` reports `Deadline`; `None` while idle.
    ///
    /// One timer tick (1 ms) after `first + deadline`, so the armed
    /// timer and the per-sample check agree on strictly-greater.
    pub fn deadline_at(&self) -> Option<Instant> {
        self.first_sample_at
            .map(|first| first + self.policy.deadline + DEADLINE_RESOLUTION)
    }

    /// Hands out the buffered rows and resets the cycle.
    pub fn take(&mut self) -> Vec<SampleRow> {
        self.processed_samples = 0;
        self.first_sample_at = None;
        std::mem::replace(
            &mut self.rows,
            Vec::with_capacity(self.policy.capacity.min(INITIAL_ROWS)),
        )
    }
}
