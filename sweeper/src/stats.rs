use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for a PeriodicTask
#[derive(Debug, Default)]
pub(crate) struct PeriodicTaskStats {
    /// Completed runs, successful or not
    runs: AtomicUsize,
    /// Runs that returned an error or timed out
    failures: AtomicUsize,
    /// Sum of items reported by successful runs
    processed: AtomicUsize,
}

impl PeriodicTaskStats {
    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub(crate) fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_success(&self, items: usize) {
        self.processed.fetch_add(items, Ordering::Relaxed);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}
