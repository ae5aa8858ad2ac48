//! Sweep progress reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives sweep progress. Shared by all sweep workers.
///
/// `advance` is called once per completed (image, overlap) job, so the
/// completed count only ever grows.
pub trait Progress: Sync {
    fn start(&self, total: u64);
    fn advance(&self);
    fn finish(&self) {}
}

/// Discards progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&self, _total: u64) {}
    fn advance(&self) {}
}

/// Logs every 10% checkpoint at info level.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: AtomicU64,
    done: AtomicU64,
    last_decile: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> u64 {
        self.done.load(Ordering::SeqCst)
    }

    /// Completed fraction in `0..=1`.
    pub fn fraction(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        (self.completed() as f64 / total as f64).min(1.0)
    }
}

impl Progress for LogProgress {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        self.last_decile.store(0, Ordering::SeqCst);
    }

    fn advance(&self) {
        let total = self.total.load(Ordering::SeqCst);
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        if total == 0 {
            return;
        }
        let decile = (done.min(total) * 10) / total;
        let prev = self.last_decile.fetch_max(decile, Ordering::SeqCst);
        if decile > prev {
            log::info!("{}% mark reached", decile * 10);
        }
    }
}
