//! Per-index write backend.
//!
//! [`IndexBackend`] ties a workspace, a work processor and the backend
//! resources together and is the entry point for the mapping layer (which
//! submits work), the query layer (which opens readers) and reconfiguration
//! (which pauses writers while metadata changes).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sluice::backend::IndexBackend;
//! use sluice::config::IndexConfig;
//! use sluice::data::Document;
//! use sluice::error_handler::LogErrorHandler;
//! use sluice::index::memory::MemoryDirectory;
//! use sluice::operation::Operation;
//!
//! let directory = MemoryDirectory::new("books");
//! let config = IndexConfig::builder().index_name("books").build().unwrap();
//! let backend = IndexBackend::new(
//!     config,
//!     Arc::new(directory.clone()),
//!     LogErrorHandler::shared(),
//!     vec!["Book".to_string()],
//! )
//! .unwrap();
//!
//! backend
//!     .apply_work(vec![Operation::add("Book", "1", Document::new().add_text("title", "Dune"))], None)
//!     .unwrap();
//! assert_eq!(directory.committed_len(), 1);
//! backend.shutdown();
//! ```

pub mod changeset;
pub mod processor;
pub mod queue_task;
pub mod resources;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::config::IndexConfig;
use crate::error::{Result, SluiceError};
use crate::error_handler::ErrorHandler;
use crate::index::{IndexDirectory, ReaderLease};
use crate::monitor::IndexingMonitor;
use crate::operation::Operation;
use crate::workspace::Workspace;

pub use changeset::{Changeset, ChangesetList, Drained};
pub use processor::{InterruptFlag, SubmitOutcome, WorkProcessor};
pub use resources::{BackendResources, BackendStats};

pub struct IndexBackend {
    config: IndexConfig,
    directory: Arc<dyn IndexDirectory>,
    resources: RwLock<Arc<BackendResources>>,
    processor: Box<dyn WorkProcessor>,
    modification_lock: Arc<RwLock<()>>,
    closed: AtomicBool,
}

impl fmt::Debug for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBackend")
            .field("index_name", &self.config.index_name)
            .field("processor", &self.processor)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl IndexBackend {
    /// Create the backend of one index and start its processor.
    pub fn new(
        config: IndexConfig,
        directory: Arc<dyn IndexDirectory>,
        error_handler: Arc<dyn ErrorHandler>,
        entity_types: Vec<String>,
    ) -> Result<Self> {
        config.validate()?;
        let resources = Arc::new(BackendResources::new(
            &config,
            Arc::clone(&directory),
            error_handler,
            entity_types,
        )?);
        let modification_lock = Arc::clone(resources.modification_lock());
        let processor = processor::start_processor(&config, Arc::clone(&resources))?;
        log::info!(
            "index backend '{}' started ({:?} workspace, {:?} execution)",
            config.index_name,
            resources.workspace().kind(),
            config.execution
        );
        Ok(Self {
            config,
            directory,
            resources: RwLock::new(resources),
            processor,
            modification_lock,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn index_name(&self) -> &str {
        &self.config.index_name
    }

    /// The current workspace. Replaced by [`IndexBackend::index_mapping_changed`].
    pub fn workspace(&self) -> Arc<dyn Workspace> {
        Arc::clone(self.resources.read().workspace())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SluiceError::invalid_operation(format!(
                "index backend '{}' is shut down",
                self.config.index_name
            )));
        }
        Ok(())
    }

    /// Submit a batch of operations.
    ///
    /// In synchronous mode this returns once the batch was applied; a failure
    /// while applying is reported to the error handler, not returned here.
    pub fn apply_work(
        &self,
        operations: Vec<Operation>,
        monitor: Option<Arc<dyn IndexingMonitor>>,
    ) -> Result<SubmitOutcome> {
        self.submit(operations, monitor, None)
    }

    /// Like [`IndexBackend::apply_work`], but a synchronous wait gives up
    /// once `interrupt` is raised. The work may still be applied afterwards.
    pub fn submit_interruptible(
        &self,
        operations: Vec<Operation>,
        monitor: Option<Arc<dyn IndexingMonitor>>,
        interrupt: &InterruptFlag,
    ) -> Result<SubmitOutcome> {
        self.submit(operations, monitor, Some(interrupt))
    }

    fn submit(
        &self,
        operations: Vec<Operation>,
        monitor: Option<Arc<dyn IndexingMonitor>>,
        interrupt: Option<&InterruptFlag>,
    ) -> Result<SubmitOutcome> {
        self.ensure_open()?;
        if operations.is_empty() {
            return Ok(SubmitOutcome::Processed);
        }
        let changeset = Arc::new(Changeset::new(operations, monitor));
        self.processor.submit(changeset, interrupt)
    }

    /// Apply one operation in the calling thread without committing it.
    ///
    /// Used for bulk loading; a later [`IndexBackend::flush`] makes the
    /// work durable.
    pub fn apply_streaming_operation(
        &self,
        operation: Operation,
        monitor: Option<Arc<dyn IndexingMonitor>>,
    ) -> Result<()> {
        self.ensure_open()?;
        queue_task::run_streaming(&self.resources, operation, monitor);
        Ok(())
    }

    /// Durability barrier: returns once all work submitted before it is committed.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let changeset = Arc::new(Changeset::new(vec![Operation::Flush], None));
        self.processor.submit(Arc::clone(&changeset), None)?;
        changeset.wait_processed(None);
        Ok(())
    }

    /// Open a reader for the query layer. Near-real-time indexes only.
    pub fn open_reader(&self) -> Result<ReaderLease> {
        self.ensure_open()?;
        self.workspace().open_reader()
    }

    pub fn close_reader(&self, reader: ReaderLease) {
        self.workspace().close_reader(reader);
    }

    /// Pause every writer of this index until the guard is dropped.
    pub fn exclusive_write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.modification_lock.write()
    }

    /// Switch to a new set of entity types.
    ///
    /// Waits for running batches, flushes and shuts down the current
    /// workspace, then redirects the processor to fresh resources.
    pub fn index_mapping_changed(&self, entity_types: Vec<String>) -> Result<()> {
        self.ensure_open()?;
        let _exclusive = self.modification_lock.write();
        let current = Arc::clone(&*self.resources.read());
        current.workspace().flush();
        current.workspace().shutdown();

        let next = Arc::new(current.reconfigured(Arc::clone(&self.directory), entity_types)?);
        *self.resources.write() = Arc::clone(&next);
        self.processor.update_resources(next);
        log::info!("index backend '{}' reconfigured", self.config.index_name);
        Ok(())
    }

    pub fn stats(&self) -> BackendStats {
        self.resources.read().stats()
    }

    /// Apply pending work, stop the processor and close the writer. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.processor.shutdown();
        let workspace = self.workspace();
        workspace.flush();
        workspace.shutdown();
        log::info!("index backend '{}' shut down", self.config.index_name);
    }
}

impl Drop for IndexBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
