use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters of one appender.
#[derive(Debug, Default)]
pub struct PublishStats {
    submitted: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`PublishStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub published: u64,
    pub failed: u64,
    pub rejected: u64,
    pub abandoned: u64,
}

impl PublishStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event that could not be turned into a task. Counts as submitted and failed
    /// so that [`pending`](Self::pending) stays consistent.
    pub fn record_format_failure(&self) {
        self.record_submitted();
        self.record_failed();
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// Tasks accepted but neither published nor failed yet.
    pub fn pending(&self) -> u64 {
        let done = self.published.load(Ordering::Acquire) + self.failed.load(Ordering::Acquire);
        self.submitted.load(Ordering::Acquire).saturating_sub(done)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}
