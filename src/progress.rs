//! Progress reporting and cancellation for correlation runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Shared flag checked once per subset
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Receives completion counts while subsets are correlated.
///
/// `total` is the number of lattice candidates; subsets rejected by the
/// sampler never report, so `completed` may stop short of it.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize);

    fn on_start(&self, _total: usize) {}

    fn on_finish(&self, _valid: usize, _completed: usize) {}
}

/// Logs progress through `tracing` every `interval_percent` percent
pub struct LoggingProgress {
    interval_percent: usize,
    last_bucket: AtomicUsize,
}

impl LoggingProgress {
    pub fn new(interval_percent: usize) -> Self {
        Self {
            interval_percent: interval_percent.clamp(1, 100),
            last_bucket: AtomicUsize::new(0),
        }
    }
}

impl Default for LoggingProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressCallback for LoggingProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        if total == 0 {
            return;
        }
        let bucket = completed * 100 / total / self.interval_percent;
        if self.last_bucket.fetch_max(bucket, Ordering::Relaxed) < bucket {
            tracing::info!(
                "Correlated {}/{} candidates ({}%)",
                completed,
                total,
                bucket * self.interval_percent
            );
        }
    }

    fn on_start(&self, total: usize) {
        self.last_bucket.store(0, Ordering::Relaxed);
        tracing::info!("Correlation started over {} lattice candidates", total);
    }

    fn on_finish(&self, valid: usize, completed: usize) {
        tracing::info!("Correlation finished: {}/{} subsets valid", valid, completed);
    }
}

/// Counts completed subsets and forwards to an optional callback
pub(crate) struct ProgressTracker<'a> {
    callback: Option<&'a dyn ProgressCallback>,
    completed: AtomicUsize,
    total: usize,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(callback: Option<&'a dyn ProgressCallback>, total: usize) -> Self {
        if let Some(callback) = callback {
            callback.on_start(total);
        }
        Self {
            callback,
            completed: AtomicUsize::new(0),
            total,
        }
    }

    pub(crate) fn tick(&self) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(callback) = self.callback {
            callback.on_progress(completed, self.total);
        }
    }

    pub(crate) fn finish(&self, valid: usize) {
        if let Some(callback) = self.callback {
            callback.on_finish(valid, self.completed.load(Ordering::Relaxed));
        }
    }
}
