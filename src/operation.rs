//! Index mutations produced by the mapping layer.
//!
//! An [`Operation`] names its target entity type and, for document-level work,
//! the document id. The core only looks at the instruction kind and the
//! entity type; document payloads are passed through to the index engine.

use serde::{Deserialize, Serialize};

use crate::data::Document;

/// A single typed instruction against one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Insert a new document.
    Add {
        entity: String,
        id: String,
        document: Document,
    },
    /// Replace any existing document with the same id.
    Update {
        entity: String,
        id: String,
        document: Document,
    },
    /// Delete the document with the given id.
    Delete { entity: String, id: String },
    /// Delete every document of an entity type.
    PurgeAll { entity: String },
    /// Force a segment merge.
    Optimize,
    /// Durability barrier: commit whatever has been applied so far.
    Flush,
}

impl Operation {
    pub fn add(entity: impl Into<String>, id: impl Into<String>, document: Document) -> Self {
        Operation::Add {
            entity: entity.into(),
            id: id.into(),
            document,
        }
    }

    pub fn update(entity: impl Into<String>, id: impl Into<String>, document: Document) -> Self {
        Operation::Update {
            entity: entity.into(),
            id: id.into(),
            document,
        }
    }

    pub fn delete(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Operation::Delete {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn purge_all(entity: impl Into<String>) -> Self {
        Operation::PurgeAll {
            entity: entity.into(),
        }
    }

    /// The entity type this operation targets, if any.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Operation::Add { entity, .. }
            | Operation::Update { entity, .. }
            | Operation::Delete { entity, .. }
            | Operation::PurgeAll { entity } => Some(entity),
            Operation::Optimize | Operation::Flush => None,
        }
    }

    /// The document id this operation targets, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Operation::Add { id, .. } | Operation::Update { id, .. } | Operation::Delete { id, .. } => {
                Some(id)
            }
            Operation::PurgeAll { .. } | Operation::Optimize | Operation::Flush => None,
        }
    }

    /// Whether the operation touches the whole index rather than one document.
    ///
    /// Index-wide operations are never reordered relative to their neighbours.
    pub fn is_index_wide(&self) -> bool {
        self.id().is_none()
    }

    /// Number of documents this operation adds when it succeeds.
    pub fn documents_added(&self) -> u64 {
        match self {
            Operation::Add { .. } | Operation::Update { .. } => 1,
            _ => 0,
        }
    }

    /// Kind of reader refresh needed before the effect of this operation is visible.
    pub fn flush_requirement(&self) -> FlushRequirement {
        match self {
            Operation::Add { .. } => FlushRequirement::Writes,
            Operation::Delete { .. } | Operation::PurgeAll { .. } => FlushRequirement::Deletes,
            Operation::Update { .. } | Operation::Flush => FlushRequirement::Both,
            Operation::Optimize => FlushRequirement::None,
        }
    }
}

/// Reader refresh requirement of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushRequirement {
    None,
    Writes,
    Deletes,
    Both,
}

impl FlushRequirement {
    pub fn needs_writes(self) -> bool {
        matches!(self, FlushRequirement::Writes | FlushRequirement::Both)
    }

    pub fn needs_deletes(self) -> bool {
        matches!(self, FlushRequirement::Deletes | FlushRequirement::Both)
    }
}
