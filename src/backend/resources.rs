//! Per-index backend resources.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockWriteGuard};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::error::{Result, SluiceError};
use crate::error_handler::ErrorHandler;
use crate::index::IndexDirectory;
use crate::workspace::{self, Workspace};

/// Counters of applied work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub batches_applied: u64,
    pub operations_applied: u64,
    pub operations_failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    batches_applied: AtomicU64,
    operations_applied: AtomicU64,
    operations_failed: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_batch(&self, applied: u64, failed: u64) {
        self.batches_applied.fetch_add(1, Ordering::Relaxed);
        self.operations_applied.fetch_add(applied, Ordering::Relaxed);
        self.operations_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BackendStats {
        BackendStats {
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
            operations_applied: self.operations_applied.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
        }
    }
}

/// Build the intra-batch fan-out pool, or `None` when one thread is configured.
pub fn build_worker_pool(config: &IndexConfig) -> Result<Option<Arc<ThreadPool>>> {
    if config.worker_threads <= 1 {
        return Ok(None);
    }
    let index_name = config.index_name.clone();
    let pool = ThreadPoolBuilder::new()
        .num_threads(config.worker_threads)
        .thread_name(move |i| format!("sluice-{index_name}-worker-{i}"))
        .build()
        .map_err(|e| SluiceError::internal(format!("failed to build worker pool: {e}")))?;
    Ok(Some(Arc::new(pool)))
}

/// Everything a queue task needs to apply work to one index.
///
/// A reconfiguration replaces the resources as a whole; the worker pool, the
/// error handler, the statistics and the modification lock carry over.
pub struct BackendResources {
    config: IndexConfig,
    workspace: Arc<dyn Workspace>,
    error_handler: Arc<dyn ErrorHandler>,
    worker_pool: Option<Arc<ThreadPool>>,
    modification_lock: Arc<RwLock<()>>,
    stats: Arc<StatsCounters>,
}

impl fmt::Debug for BackendResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendResources")
            .field("index_name", &self.config.index_name)
            .field("workspace", &self.workspace)
            .field(
                "worker_threads",
                &self.worker_pool.as_ref().map(|p| p.current_num_threads()),
            )
            .finish()
    }
}

impl BackendResources {
    pub fn new(
        config: &IndexConfig,
        directory: Arc<dyn IndexDirectory>,
        error_handler: Arc<dyn ErrorHandler>,
        entity_types: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let workspace = workspace::create_workspace(
            config,
            directory,
            Arc::clone(&error_handler),
            entity_types,
        )?;
        Ok(Self {
            config: config.clone(),
            workspace,
            error_handler,
            worker_pool: build_worker_pool(config)?,
            modification_lock: Arc::new(RwLock::new(())),
            stats: Arc::new(StatsCounters::default()),
        })
    }

    /// Resources for a new set of entity types, sharing pools, lock and
    /// statistics with `self`.
    pub fn reconfigured(
        &self,
        directory: Arc<dyn IndexDirectory>,
        entity_types: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let workspace = workspace::create_workspace(
            &self.config,
            directory,
            Arc::clone(&self.error_handler),
            entity_types,
        )?;
        Ok(Self {
            config: self.config.clone(),
            workspace,
            error_handler: Arc::clone(&self.error_handler),
            worker_pool: self.worker_pool.clone(),
            modification_lock: Arc::clone(&self.modification_lock),
            stats: Arc::clone(&self.stats),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    pub fn error_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.error_handler
    }

    pub fn worker_pool(&self) -> Option<&ThreadPool> {
        self.worker_pool.as_deref()
    }

    /// Lock held shared by every queue task and exclusively by reconfiguration.
    pub fn modification_lock(&self) -> &Arc<RwLock<()>> {
        &self.modification_lock
    }

    /// Pause all writers of this index until the guard is dropped.
    pub fn exclusive_write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.modification_lock.write()
    }

    pub(crate) fn stats_counters(&self) -> &StatsCounters {
        &self.stats
    }

    pub fn stats(&self) -> BackendStats {
        self.stats.snapshot()
    }
}
