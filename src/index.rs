//! Seam to the segment-based index engine.
//!
//! The write/commit engine does not implement indexing itself. It drives an
//! engine through three traits:
//!
//! - [`IndexDirectory`]: the physical index; hands out at most one writer at a
//!   time and opens readers over committed data.
//! - [`IndexWriter`]: the expensive, internally synchronized writer handle.
//! - [`IndexReader`]: a point-in-time view, either committed or near-real-time.
//!
//! [`memory::MemoryDirectory`] is a complete in-memory engine used for
//! embedding and tests.

pub mod memory;
pub mod shared_reader;

use std::fmt;
use std::sync::Arc;

use crate::data::Document;
use crate::error::Result;

pub use shared_reader::{ReaderLease, SharedReader};

/// A physical index holding committed segments and the single-writer lock.
pub trait IndexDirectory: Send + Sync + fmt::Debug {
    /// Name of the index, used in logs and error reports.
    fn name(&self) -> &str;

    /// Open the writer, acquiring the write lock.
    ///
    /// Fails with [`crate::SluiceError::LockObtainFailed`] if another writer
    /// holds the lock.
    fn open_writer(&self) -> Result<Arc<dyn IndexWriter>>;

    /// Open a reader over the last committed state.
    fn open_reader(&self) -> Result<Box<dyn IndexReader>>;

    /// Whether the write lock is currently held.
    fn is_locked(&self) -> bool;

    /// Release the write lock regardless of who holds it.
    fn force_unlock(&self) -> Result<()>;
}

/// Writer handle of an index engine.
///
/// All methods take `&self`: implementations synchronize internally so a batch
/// can be fanned out over several worker threads against one handle.
pub trait IndexWriter: Send + Sync + fmt::Debug {
    fn add_document(&self, entity: &str, id: &str, document: Document) -> Result<()>;

    /// Atomically delete every document whose id term matches and add the new one.
    fn update_document(&self, entity: &str, id: &str, document: Document) -> Result<()>;

    /// Single-term delete: removes every document with this id, whatever its type.
    fn delete_by_id(&self, id: &str) -> Result<()>;

    /// Delete the document matching both entity type and id.
    fn delete_by_entity_and_id(&self, entity: &str, id: &str) -> Result<()>;

    fn delete_all_of_type(&self, entity: &str) -> Result<()>;

    /// Merge segments down to one.
    fn force_merge(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    /// Discard uncommitted changes and release the write lock.
    fn rollback(&self) -> Result<()>;

    /// Commit pending changes and release the write lock.
    fn close(&self) -> Result<()>;

    /// Open a near-real-time reader over the writer's current state.
    fn open_reader(&self, apply_deletes: bool) -> Result<Box<dyn IndexReader>>;
}

/// A point-in-time view over an index.
pub trait IndexReader: Send + Sync + fmt::Debug {
    fn num_docs(&self) -> usize;

    fn contains(&self, entity: &str, id: &str) -> bool;

    fn document(&self, entity: &str, id: &str) -> Option<Document>;

    /// All `(entity, id)` pairs visible to this reader, in key order.
    fn ids(&self) -> Vec<(String, String)>;

    /// Release engine resources held by the reader.
    fn close(&self) {}
}
