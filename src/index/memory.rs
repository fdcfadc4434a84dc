//! In-memory index engine.
//!
//! [`MemoryDirectory`] keeps committed documents in a map and enforces the
//! single-writer lock. Its writer works on a private copy of the committed
//! state until `commit()` publishes it. One-shot failure injection makes
//! the recovery paths of the write/commit engine observable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::data::Document;
use crate::error::{Result, SluiceError};
use crate::index::{IndexDirectory, IndexReader, IndexWriter};

type DocKey = (String, String);
type Segment = BTreeMap<DocKey, Document>;

/// Pending one-shot failures.
#[derive(Debug, Default)]
struct Faults {
    open: u32,
    commit: u32,
    close: u32,
    apply: u32,
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    committed: RwLock<Arc<Segment>>,
    locked: Mutex<bool>,
    commits: AtomicU64,
    writers_opened: AtomicU64,
    merges: AtomicU64,
    open_readers: AtomicI64,
    faults: Mutex<Faults>,
}

impl DirectoryState {
    fn release_lock(&self) {
        *self.locked.lock() = false;
    }
}

/// An index held entirely in memory.
#[derive(Clone)]
pub struct MemoryDirectory {
    name: String,
    state: Arc<DirectoryState>,
}

impl fmt::Debug for MemoryDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDirectory")
            .field("name", &self.name)
            .field("committed_docs", &self.committed_len())
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl MemoryDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(DirectoryState::default()),
        }
    }

    /// Make the next `open_writer` call fail with an I/O error.
    pub fn fail_next_open(&self) {
        self.state.faults.lock().open += 1;
    }

    /// Make the next writer `commit` fail with an I/O error.
    pub fn fail_next_commit(&self) {
        self.state.faults.lock().commit += 1;
    }

    /// Make the next writer `close` fail, leaving the lock held.
    pub fn fail_next_close(&self) {
        self.state.faults.lock().close += 1;
    }

    /// Make the next document-level writer call fail.
    pub fn fail_next_apply(&self) {
        self.state.faults.lock().apply += 1;
    }

    /// Committed `(entity, id)` pairs in key order.
    pub fn committed_ids(&self) -> Vec<(String, String)> {
        self.state.committed.read().keys().cloned().collect()
    }

    pub fn committed_len(&self) -> usize {
        self.state.committed.read().len()
    }

    /// Number of successful commits, including those done by `close`.
    pub fn commit_count(&self) -> u64 {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn writers_opened(&self) -> u64 {
        self.state.writers_opened.load(Ordering::SeqCst)
    }

    pub fn merge_count(&self) -> u64 {
        self.state.merges.load(Ordering::SeqCst)
    }

    /// Readers opened and not yet closed.
    /// Whether a writer currently holds the write lock.
    pub fn is_locked(&self) -> bool {
        *self.state.locked.lock()
    }

    pub fn open_readers(&self) -> i64 {
        self.state.open_readers.load(Ordering::SeqCst)
    }

    fn reader_over(&self, docs: Arc<Segment>, applies_deletes: bool) -> MemoryReader {
        self.state.open_readers.fetch_add(1, Ordering::SeqCst);
        MemoryReader {
            docs,
            applies_deletes,
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }
    }
}

impl IndexDirectory for MemoryDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_writer(&self) -> Result<Arc<dyn IndexWriter>> {
        if take_fault(&mut self.state.faults.lock().open) {
            return Err(SluiceError::Io(std::io::Error::other(format!(
                "injected failure opening writer for '{}'",
                self.name
            ))));
        }
        {
            let mut locked = self.state.locked.lock();
            if *locked {
                return Err(SluiceError::lock_obtain_failed(format!(
                    "write lock of '{}' is held",
                    self.name
                )));
            }
            *locked = true;
        }
        self.state.writers_opened.fetch_add(1, Ordering::SeqCst);
        let docs = Segment::clone(&self.state.committed.read());
        Ok(Arc::new(MemoryIndexWriter {
            directory: self.clone(),
            state: Mutex::new(WriterState {
                docs,
                dirty: false,
                closed: false,
            }),
        }))
    }

    fn open_reader(&self) -> Result<Box<dyn IndexReader>> {
        let docs = Arc::clone(&self.state.committed.read());
        Ok(Box::new(self.reader_over(docs, true)))
    }

    fn is_locked(&self) -> bool {
        MemoryDirectory::is_locked(self)
    }

    fn force_unlock(&self) -> Result<()> {
        self.state.release_lock();
        Ok(())
    }
}

#[derive(Debug)]
struct WriterState {
    docs: Segment,
    dirty: bool,
    closed: bool,
}

/// Writer over a [`MemoryDirectory`].
#[derive(Debug)]
pub struct MemoryIndexWriter {
    directory: MemoryDirectory,
    state: Mutex<WriterState>,
}

impl MemoryIndexWriter {
    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Segment),
    {
        if take_fault(&mut self.directory.state.faults.lock().apply) {
            return Err(SluiceError::index("injected failure applying operation"));
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(SluiceError::writer_closed(self.directory.name.clone()));
        }
        f(&mut state.docs);
        state.dirty = true;
        Ok(())
    }

    fn publish(&self, state: &mut WriterState) -> Result<()> {
        if take_fault(&mut self.directory.state.faults.lock().commit) {
            return Err(SluiceError::Io(std::io::Error::other(
                "injected failure committing",
            )));
        }
        *self.directory.state.committed.write() = Arc::new(state.docs.clone());
        self.directory.state.commits.fetch_add(1, Ordering::SeqCst);
        state.dirty = false;
        Ok(())
    }
}

impl IndexWriter for MemoryIndexWriter {
    fn add_document(&self, entity: &str, id: &str, document: Document) -> Result<()> {
        self.mutate(|docs| {
            docs.insert((entity.to_string(), id.to_string()), document);
        })
    }

    fn update_document(&self, entity: &str, id: &str, document: Document) -> Result<()> {
        self.mutate(|docs| {
            docs.retain(|(_, doc_id), _| doc_id != id);
            docs.insert((entity.to_string(), id.to_string()), document);
        })
    }

    fn delete_by_id(&self, id: &str) -> Result<()> {
        self.mutate(|docs| docs.retain(|(_, doc_id), _| doc_id != id))
    }

    fn delete_by_entity_and_id(&self, entity: &str, id: &str) -> Result<()> {
        self.mutate(|docs| {
            docs.remove(&(entity.to_string(), id.to_string()));
        })
    }

    fn delete_all_of_type(&self, entity: &str) -> Result<()> {
        self.mutate(|docs| docs.retain(|(doc_entity, _), _| doc_entity != entity))
    }

    fn force_merge(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(SluiceError::writer_closed(self.directory.name.clone()));
        }
        self.directory.state.merges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SluiceError::writer_closed(self.directory.name.clone()));
        }
        self.publish(&mut state)
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.docs.clear();
        state.dirty = false;
        self.directory.state.release_lock();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if take_fault(&mut self.directory.state.faults.lock().close) {
            // The lock stays held, as after a crash half way through close.
            state.closed = true;
            return Err(SluiceError::Io(std::io::Error::other(
                "injected failure closing writer",
            )));
        }
        if state.dirty {
            self.publish(&mut state)?;
        }
        state.closed = true;
        self.directory.state.release_lock();
        Ok(())
    }

    fn open_reader(&self, apply_deletes: bool) -> Result<Box<dyn IndexReader>> {
        let state = self.state.lock();
        if state.closed {
            return Err(SluiceError::writer_closed(self.directory.name.clone()));
        }
        let docs = Arc::new(state.docs.clone());
        Ok(Box::new(self.directory.reader_over(docs, apply_deletes)))
    }
}

/// Snapshot reader over a [`MemoryDirectory`] or its writer.
pub struct MemoryReader {
    docs: Arc<Segment>,
    applies_deletes: bool,
    closed: AtomicBool,
    state: Arc<DirectoryState>,
}

impl MemoryReader {
    /// Whether the reader was opened with pending deletes applied.
    pub fn applies_deletes(&self) -> bool {
        self.applies_deletes
    }
}

impl fmt::Debug for MemoryReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryReader")
            .field("num_docs", &self.docs.len())
            .field("applies_deletes", &self.applies_deletes)
            .finish()
    }
}

impl IndexReader for MemoryReader {
    fn num_docs(&self) -> usize {
        self.docs.len()
    }

    fn contains(&self, entity: &str, id: &str) -> bool {
        self.docs.contains_key(&(entity.to_string(), id.to_string()))
    }

    fn document(&self, entity: &str, id: &str) -> Option<Document> {
        self.docs.get(&(entity.to_string(), id.to_string())).cloned()
    }

    fn ids(&self) -> Vec<(String, String)> {
        self.docs.keys().cloned().collect()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.open_readers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
