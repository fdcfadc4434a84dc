//! Workspace for an index owned by this process alone.

use crate::config::WorkspaceKind;
use crate::workspace::{Workspace, WorkspaceCore};

/// Single-process, single-writer workspace.
///
/// The writer stays open between batches; the configured per-changeset or
/// scheduled commit policy decides when changes become durable.
#[derive(Debug)]
pub struct ExclusiveWorkspace {
    core: WorkspaceCore,
}

impl ExclusiveWorkspace {
    pub fn new(core: WorkspaceCore) -> Self {
        Self { core }
    }
}

impl Workspace for ExclusiveWorkspace {
    fn core(&self) -> &WorkspaceCore {
        &self.core
    }

    fn kind(&self) -> WorkspaceKind {
        WorkspaceKind::Exclusive
    }
}
