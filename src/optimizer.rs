//! Segment merge triggers.
//!
//! After each successful batch the workspace hands the number of operations
//! applied since the previous check to its [`OptimizerStrategy`], which may
//! decide to force a merge on the writer.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::IndexWriter;

/// Merge thresholds. A `None` limit never triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Merge after this many applied operations.
    #[serde(default)]
    pub operation_limit: Option<u64>,
    /// Merge after this many applied batches.
    #[serde(default)]
    pub transaction_limit: Option<u64>,
}

impl OptimizerConfig {
    pub fn is_enabled(&self) -> bool {
        self.operation_limit.is_some() || self.transaction_limit.is_some()
    }
}

pub trait OptimizerStrategy: Send + Sync + fmt::Debug {
    /// Account for one applied batch of `operations` operations.
    fn add_operations(&self, operations: u64);

    /// Merge if the thresholds were crossed. Returns whether a merge ran.
    fn optimize(&self, writer: &dyn IndexWriter) -> Result<bool>;

    /// Run an explicitly requested merge.
    fn perform_optimization(&self, writer: &dyn IndexWriter) -> Result<()> {
        writer.force_merge()
    }
}

/// Never merges on its own; explicit requests still merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpOptimizer;

impl OptimizerStrategy for NoOpOptimizer {
    fn add_operations(&self, _operations: u64) {}

    fn optimize(&self, _writer: &dyn IndexWriter) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Default)]
struct Counts {
    operations: u64,
    transactions: u64,
}

/// Merges once enough operations or batches accumulated.
#[derive(Debug)]
pub struct IncrementalOptimizer {
    config: OptimizerConfig,
    counts: Mutex<Counts>,
}

impl IncrementalOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            counts: Mutex::new(Counts::default()),
        }
    }

    fn needs_optimization(&self, counts: &Counts) -> bool {
        self.config
            .operation_limit
            .is_some_and(|limit| counts.operations >= limit)
            || self
                .config
                .transaction_limit
                .is_some_and(|limit| counts.transactions >= limit)
    }
}

impl OptimizerStrategy for IncrementalOptimizer {
    fn add_operations(&self, operations: u64) {
        let mut counts = self.counts.lock();
        counts.operations += operations;
        counts.transactions += 1;
    }

    fn optimize(&self, writer: &dyn IndexWriter) -> Result<bool> {
        let mut counts = self.counts.lock();
        if !self.needs_optimization(&counts) {
            return Ok(false);
        }
        log::debug!(
            "merging segments after {} operations in {} batches",
            counts.operations,
            counts.transactions
        );
        *counts = Counts::default();
        self.perform_optimization(writer)?;
        Ok(true)
    }
}

/// Build the strategy matching a configuration.
pub fn from_config(config: &OptimizerConfig) -> Box<dyn OptimizerStrategy> {
    if config.is_enabled() {
        Box::new(IncrementalOptimizer::new(*config))
    } else {
        Box::new(NoOpOptimizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexDirectory;
    use crate::index::memory::MemoryDirectory;

    #[test]
    fn test_operation_limit() {
        let dir = MemoryDirectory::new("books");
        let writer = dir.open_writer().unwrap();
        let optimizer = IncrementalOptimizer::new(OptimizerConfig {
            operation_limit: Some(10),
            transaction_limit: None,
        });

        optimizer.add_operations(6);
        assert!(!optimizer.optimize(writer.as_ref()).unwrap());
        optimizer.add_operations(4);
        assert!(optimizer.optimize(writer.as_ref()).unwrap());
        assert_eq!(dir.merge_count(), 1);

        // Counters reset after a merge.
        optimizer.add_operations(1);
        assert!(!optimizer.optimize(writer.as_ref()).unwrap());
    }

    #[test]
    fn test_transaction_limit() {
        let dir = MemoryDirectory::new("books");
        let writer = dir.open_writer().unwrap();
        let optimizer = IncrementalOptimizer::new(OptimizerConfig {
            operation_limit: None,
            transaction_limit: Some(2),
        });

        optimizer.add_operations(1);
        assert!(!optimizer.optimize(writer.as_ref()).unwrap());
        optimizer.add_operations(1);
        assert!(optimizer.optimize(writer.as_ref()).unwrap());
    }

    #[test]
    fn test_noop_still_allows_forced_merge() {
        let dir = MemoryDirectory::new("books");
        let writer = dir.open_writer().unwrap();
        let optimizer = from_config(&OptimizerConfig::default());

        optimizer.add_operations(1_000_000);
        assert!(!optimizer.optimize(writer.as_ref()).unwrap());
        optimizer.perform_optimization(writer.as_ref()).unwrap();
        assert_eq!(dir.merge_count(), 1);
    }
}
