//! Progress reporting for submitted work.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Notified as documents of a submitted batch reach the writer.
pub trait IndexingMonitor: Send + Sync + fmt::Debug {
    fn documents_added(&self, count: u64);
}

/// Monitor that only counts.
#[derive(Debug, Default)]
pub struct CountingMonitor {
    added: AtomicU64,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }
}

impl IndexingMonitor for CountingMonitor {
    fn documents_added(&self, count: u64) {
        self.added.fetch_add(count, Ordering::Relaxed);
    }
}
