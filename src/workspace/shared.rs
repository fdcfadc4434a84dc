//! Workspace for an index other processes may write to as well.

use crate::config::WorkspaceKind;
use crate::workspace::{Workspace, WorkspaceCore};

/// Workspace that holds the write lock only while batches use it.
///
/// Writer acquisition and release are counted by the shared commit policy:
/// the last batch to finish closes the writer, freeing the lock for other
/// processes. Streaming work keeps the writer open until the next flush.
#[derive(Debug)]
pub struct SharedWorkspace {
    core: WorkspaceCore,
}

impl SharedWorkspace {
    pub fn new(core: WorkspaceCore) -> Self {
        Self { core }
    }

    /// Batches currently holding the writer.
    pub fn open_users(&self) -> usize {
        self.core.commit_policy().open_users()
    }
}

impl Workspace for SharedWorkspace {
    fn core(&self) -> &WorkspaceCore {
        &self.core
    }

    fn kind(&self) -> WorkspaceKind {
        WorkspaceKind::Shared
    }

    fn shutdown(&self) {
        let users = self.open_users();
        if users > 0 {
            log::warn!(
                "shutting down '{}' with {users} batches still holding the writer",
                self.index_name()
            );
        }
        self.core.holder().close();
    }
}
