//! Per-index owner of the writer lifecycle.
//!
//! A workspace combines the [`IndexWriterHolder`], the [`CommitPolicy`]
//! chosen for the index and some bookkeeping: the number of operations
//! applied since the last optimizer check and the set of entity types mapped
//! into the index. Three variants exist:
//!
//! - [`ExclusiveWorkspace`]: this process owns the index.
//! - [`SharedWorkspace`]: other processes may write; the writer is released
//!   as soon as the last batch using it finished.
//! - [`NrtWorkspace`]: exclusive, and serves near-real-time readers straight
//!   from the writer.

pub mod commit_policy;
pub mod exclusive;
pub mod holder;
pub mod nrt;
pub mod shared;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use parking_lot::RwLock;

use crate::config::{IndexConfig, WorkspaceKind};
use crate::error::{Result, SluiceError};
use crate::error_handler::{ErrorContextBuilder, ErrorHandler};
use crate::index::{IndexDirectory, IndexWriter, ReaderLease};
use crate::operation::Operation;
use crate::optimizer::{self, OptimizerStrategy};

pub use commit_policy::{CommitPolicy, CommitPolicyKind};
pub use exclusive::ExclusiveWorkspace;
pub use holder::IndexWriterHolder;
pub use nrt::NrtWorkspace;
pub use shared::SharedWorkspace;

/// State common to every workspace variant.
pub struct WorkspaceCore {
    holder: Arc<IndexWriterHolder>,
    commit_policy: CommitPolicy,
    optimizer: Box<dyn OptimizerStrategy>,
    modifications: AtomicU64,
    entity_types: RwLock<AHashSet<String>>,
    metadata_complete: bool,
}

impl fmt::Debug for WorkspaceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceCore")
            .field("index_name", &self.holder.index_name())
            .field("commit_policy", &self.commit_policy.kind())
            .field("entity_types", &*self.entity_types.read())
            .finish()
    }
}

impl WorkspaceCore {
    pub fn new(
        config: &IndexConfig,
        directory: Arc<dyn IndexDirectory>,
        error_handler: Arc<dyn ErrorHandler>,
        entity_types: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let holder = Arc::new(IndexWriterHolder::new(
            config.index_name.clone(),
            directory,
            error_handler,
        ));
        let commit_policy = CommitPolicy::new(config.commit_policy_kind(), Arc::clone(&holder))?;
        Ok(Self {
            holder,
            commit_policy,
            optimizer: optimizer::from_config(&config.optimizer),
            modifications: AtomicU64::new(0),
            entity_types: RwLock::new(entity_types.into_iter().collect()),
            metadata_complete: config.metadata_complete,
        })
    }

    pub fn holder(&self) -> &Arc<IndexWriterHolder> {
        &self.holder
    }

    pub fn commit_policy(&self) -> &CommitPolicy {
        &self.commit_policy
    }

    pub fn increment_modifications(&self) {
        self.modifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Operations applied since the last optimizer phase.
    pub fn pending_modifications(&self) -> u64 {
        self.modifications.load(Ordering::Relaxed)
    }

    fn optimizer_phase(&self, writer: &dyn IndexWriter) -> Result<bool> {
        let operations = self.modifications.swap(0, Ordering::AcqRel);
        self.optimizer.add_operations(operations);
        self.optimizer.optimize(writer)
    }

    fn single_term_deletes_safe(&self) -> bool {
        self.metadata_complete && self.entity_types.read().len() == 1
    }
}

/// Per-index façade used by the queue task and the backend.
pub trait Workspace: Send + Sync + fmt::Debug {
    fn core(&self) -> &WorkspaceCore;

    fn kind(&self) -> WorkspaceKind;

    fn index_name(&self) -> &str {
        self.core().holder.index_name()
    }

    fn writer_holder(&self) -> &Arc<IndexWriterHolder> {
        &self.core().holder
    }

    /// Writer for one batch, or `None` if it cannot be opened (already reported).
    fn get_index_writer(
        &self,
        context: Option<&mut ErrorContextBuilder>,
    ) -> Option<Arc<dyn IndexWriter>> {
        self.core().commit_policy.get_writer(context)
    }

    /// Called once per operation that reached the writer.
    fn notify_work_applied(&self, _operation: &Operation) {
        self.core().increment_modifications();
    }

    /// Feed the modification count to the optimizer, which may merge.
    fn optimizer_phase(&self, writer: &dyn IndexWriter) -> Result<bool> {
        self.core().optimizer_phase(writer)
    }

    /// Merge on explicit request.
    fn perform_optimization(&self, writer: &dyn IndexWriter) -> Result<()> {
        self.core().optimizer.perform_optimization(writer)
    }

    fn after_batch_applied(&self, failed: bool, streaming: bool) {
        self.core().commit_policy.on_batch_applied(failed, streaming);
    }

    /// Durability barrier: everything applied so far gets committed.
    fn flush(&self) {
        self.core().commit_policy.on_flush();
    }

    /// Whether a delete may match on the id term alone.
    fn are_single_term_deletes_safe(&self) -> bool {
        self.core().single_term_deletes_safe()
    }

    /// Register one more entity type mapped into this index.
    fn add_entity_type(&self, entity: &str) {
        let added = self.core().entity_types.write().insert(entity.to_string());
        if added {
            log::debug!(
                "index '{}' now holds entity type '{entity}'",
                self.index_name()
            );
        }
    }

    fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.core().entity_types.read().iter().cloned().collect();
        types.sort();
        types
    }

    /// Open a reader for the query layer.
    fn open_reader(&self) -> Result<ReaderLease> {
        Err(SluiceError::unsupported(format!(
            "index '{}' does not serve near-real-time readers",
            self.index_name()
        )))
    }

    /// Return a reader obtained from [`Workspace::open_reader`].
    fn close_reader(&self, reader: ReaderLease) {
        drop(reader);
    }

    /// Stop background work and close the writer.
    fn shutdown(&self) {
        let core = self.core();
        core.commit_policy.stop();
        core.holder.close();
    }
}

/// Build the workspace variant selected by `config`.
pub fn create_workspace(
    config: &IndexConfig,
    directory: Arc<dyn IndexDirectory>,
    error_handler: Arc<dyn ErrorHandler>,
    entity_types: impl IntoIterator<Item = String>,
) -> Result<Arc<dyn Workspace>> {
    config.validate()?;
    let core = WorkspaceCore::new(config, directory, error_handler, entity_types)?;
    let workspace: Arc<dyn Workspace> = match config.workspace_kind() {
        WorkspaceKind::Exclusive => Arc::new(ExclusiveWorkspace::new(core)),
        WorkspaceKind::Shared => Arc::new(SharedWorkspace::new(core)),
        WorkspaceKind::NearRealTime => Arc::new(NrtWorkspace::new(core)),
    };
    log::debug!(
        "created {:?} workspace for '{}' with {:?} commit policy",
        workspace.kind(),
        config.index_name,
        config.commit_policy_kind()
    );
    Ok(workspace)
}
