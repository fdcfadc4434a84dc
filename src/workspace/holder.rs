//! Lazily created, lock-protected writer handle of one index.
//!
//! The holder owns the only writer of its directory. Creation, commit, close
//! and forced release are serialized by an initialization lock; once
//! published the handle is read through a shared lock without contending
//! with creation. Every I/O failure goes through
//! [`IndexWriterHolder::handle_failure`], which reports it on the error
//! channel and leaves the holder empty so the next acquisition retries.
//!
//! The holder also remembers the operations of acknowledged batches that
//! have not been committed yet. When a rollback or a failed close discards
//! them they are reported as lost rather than disappearing silently.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, SluiceError};
use crate::error_handler::{ErrorContextBuilder, ErrorHandler};
use crate::index::{IndexDirectory, IndexReader, IndexWriter};
use crate::operation::Operation;

pub struct IndexWriterHolder {
    index_name: String,
    directory: Arc<dyn IndexDirectory>,
    error_handler: Arc<dyn ErrorHandler>,
    writer: RwLock<Option<Arc<dyn IndexWriter>>>,
    init_lock: Mutex<()>,
    /// Applied, acknowledged and not yet durable. Only removed under `init_lock`.
    uncommitted: Mutex<Vec<Operation>>,
}

impl fmt::Debug for IndexWriterHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexWriterHolder")
            .field("index_name", &self.index_name)
            .field("open", &self.is_open())
            .field("uncommitted", &self.uncommitted_len())
            .finish()
    }
}

impl IndexWriterHolder {
    pub fn new(
        index_name: impl Into<String>,
        directory: Arc<dyn IndexDirectory>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            directory,
            error_handler,
            writer: RwLock::new(None),
            init_lock: Mutex::new(()),
            uncommitted: Mutex::new(Vec::new()),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn directory(&self) -> &Arc<dyn IndexDirectory> {
        &self.directory
    }

    pub fn error_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.error_handler
    }

    /// Return the writer, opening it first if needed.
    ///
    /// Returns `None` if opening failed; the failure has already been
    /// reported, attached to `context` when one is given.
    pub fn get_writer(
        &self,
        context: Option<&mut ErrorContextBuilder>,
    ) -> Option<Arc<dyn IndexWriter>> {
        if let Some(writer) = self.writer.read().as_ref() {
            return Some(Arc::clone(writer));
        }

        let _init = self.init_lock.lock();
        if let Some(writer) = self.writer.read().as_ref() {
            return Some(Arc::clone(writer));
        }
        match self.directory.open_writer() {
            Ok(writer) => {
                log::debug!("opened index writer for '{}'", self.index_name);
                *self.writer.write() = Some(Arc::clone(&writer));
                Some(writer)
            }
            Err(e) => {
                self.handle_failure(e, context);
                None
            }
        }
    }

    /// The writer if one is currently open; never opens one.
    pub fn writer_if_open(&self) -> Option<Arc<dyn IndexWriter>> {
        self.writer.read().clone()
    }

    pub fn is_open(&self) -> bool {
        self.writer.read().is_some()
    }

    /// Remember operations of a successful batch until they are committed.
    ///
    /// Must be called after the operations reached the writer.
    pub fn track_uncommitted(&self, operations: impl IntoIterator<Item = Operation>) {
        self.uncommitted.lock().extend(operations);
    }

    /// Number of applied operations not yet known to be durable.
    pub fn uncommitted_len(&self) -> usize {
        self.uncommitted.lock().len()
    }

    /// Commit the open writer, if any.
    pub fn commit(&self, context: Option<&mut ErrorContextBuilder>) {
        let _init = self.init_lock.lock();
        let Some(writer) = self.writer_if_open() else {
            return;
        };
        // Operations tracked from here on may have missed this commit.
        let covered = self.uncommitted_len();
        match writer.commit() {
            Ok(()) => {
                self.uncommitted.lock().drain(..covered);
                log::trace!("committed index '{}'", self.index_name);
            }
            Err(e) => self.handle_failure(e, context),
        }
    }

    /// Close the writer. Closing an empty holder is a no-op.
    ///
    /// A failed close releases the lock by force before reporting.
    pub fn close(&self) {
        let _init = self.init_lock.lock();
        let Some(writer) = self.writer.write().take() else {
            return;
        };
        match writer.close() {
            Ok(()) => {
                self.uncommitted.lock().clear();
                log::debug!("closed index writer for '{}'", self.index_name);
            }
            Err(e) => {
                self.force_unlock_directory();
                self.report_discarded();
                self.handle_failure(e, None);
            }
        }
    }

    /// Drop the writer without committing and release the write lock.
    ///
    /// Used after a failed batch so half-applied work is never committed.
    /// Acknowledged work discarded with it is reported.
    pub fn force_release_lock(&self) {
        let _init = self.init_lock.lock();
        let writer = self.writer.write().take();
        if let Some(writer) = writer
            && let Err(e) = writer.rollback()
        {
            log::warn!(
                "rollback of index writer for '{}' failed: {e}",
                self.index_name
            );
        }
        self.force_unlock_directory();
        self.report_discarded();
    }

    fn force_unlock_directory(&self) {
        match self.directory.force_unlock() {
            Ok(()) => log::warn!("forcibly released write lock of '{}'", self.index_name),
            Err(e) => self.error_handler.handle_exception(
                &format!("unable to release write lock of '{}'", self.index_name),
                &e,
            ),
        }
    }

    fn report_discarded(&self) {
        let lost = std::mem::take(&mut *self.uncommitted.lock());
        if lost.is_empty() {
            return;
        }
        log::warn!(
            "{} acknowledged operations on '{}' were discarded before commit",
            lost.len(),
            self.index_name
        );
        let mut context = ErrorContextBuilder::new()
            .index_name(self.index_name.clone())
            .all_work_to_be_done(lost.clone());
        for operation in lost {
            context.add_failed(operation);
        }
        let context = context
            .error_then(SluiceError::index(format!(
                "uncommitted changes of '{}' were discarded",
                self.index_name
            )))
            .build();
        self.error_handler.handle(&context);
    }

    /// Open a near-real-time reader from the writer, or `None` when no
    /// writer is open.
    pub fn open_nrt_reader(&self, apply_deletes: bool) -> Result<Option<Box<dyn IndexReader>>> {
        match self.writer_if_open() {
            Some(writer) => writer.open_reader(apply_deletes).map(Some),
            None => Ok(None),
        }
    }

    /// Open a reader over committed data.
    pub fn open_directory_reader(&self) -> Result<Box<dyn IndexReader>> {
        self.directory.open_reader()
    }

    /// Report an I/O failure, with the in-flight batch when there is one.
    ///
    /// The builder is drained into the report.
    pub fn handle_failure(&self, error: SluiceError, context: Option<&mut ErrorContextBuilder>) {
        match context {
            Some(builder) => {
                builder.set_error(error);
                let context = std::mem::take(builder).build();
                self.error_handler.handle(&context);
            }
            None => self.error_handler.handle_exception(
                &format!("I/O failure on index '{}'", self.index_name),
                &error,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{Receiver, Sender};

    use super::*;
    use crate::data::Document;
    use crate::index::memory::MemoryDirectory;
    use crate::test_util::RecordingErrorHandler;

    fn holder(dir: &MemoryDirectory) -> (IndexWriterHolder, Arc<RecordingErrorHandler>) {
        let handler = Arc::new(RecordingErrorHandler::default());
        let holder = IndexWriterHolder::new("books", Arc::new(dir.clone()), handler.clone());
        (holder, handler)
    }

    #[test]
    fn test_lazy_single_open() {
        let dir = MemoryDirectory::new("books");
        let (holder, _) = holder(&dir);
        assert!(!holder.is_open());

        let a = holder.get_writer(None).unwrap();
        let b = holder.get_writer(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(dir.writers_opened(), 1);
    }

    #[test]
    fn test_concurrent_get_writer_opens_once() {
        let dir = MemoryDirectory::new("books");
        let (holder, handler) = holder(&dir);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| assert!(holder.get_writer(None).is_some()));
            }
        });
        assert_eq!(dir.writers_opened(), 1);
        assert_eq!(handler.exception_count(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = MemoryDirectory::new("books");
        let (holder, handler) = holder(&dir);
        let writer = holder.get_writer(None).unwrap();
        writer
            .add_document("Book", "1", Document::new().add_text("title", "Dune"))
            .unwrap();

        holder.close();
        holder.close();
        assert!(!holder.is_open());
        assert!(!dir.is_locked());
        assert_eq!(dir.committed_len(), 1);
        assert_eq!(handler.exception_count(), 0);
    }

    #[test]
    fn test_failed_close_forces_unlock_and_reports() {
        let dir = MemoryDirectory::new("books");
        let (holder, handler) = holder(&dir);
        holder.get_writer(None).unwrap();
        dir.fail_next_close();

        holder.close();
        assert!(!holder.is_open());
        assert!(!dir.is_locked());
        assert_eq!(handler.exception_count(), 1);

        // The next acquisition starts cleanly.
        assert!(holder.get_writer(None).is_some());
    }

    #[test]
    fn test_open_failure_reports_with_context() {
        let dir = MemoryDirectory::new("books");
        let (holder, handler) = holder(&dir);
        dir.fail_next_open();

        let op = crate::operation::Operation::delete("Book", "1");
        let mut context = ErrorContextBuilder::new()
            .index_name("books")
            .all_work_to_be_done(vec![op.clone()]);
        assert!(holder.get_writer(Some(&mut context)).is_none());
        assert!(!holder.is_open());

        let reports = handler.contexts();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].all, vec![op]);
        assert!(reports[0].cause.is_some());

        assert!(holder.get_writer(None).is_some());
    }

    #[test]
    fn test_force_release_discards_uncommitted() {
        let dir = MemoryDirectory::new("books");
        let (holder, _) = holder(&dir);
        let writer = holder.get_writer(None).unwrap();
        writer.add_document("Book", "1", Document::new()).unwrap();

        holder.force_release_lock();
        assert!(!holder.is_open());
        assert!(!dir.is_locked());
        assert_eq!(dir.committed_len(), 0);
    }

    #[test]
    fn test_nrt_reader_requires_open_writer() {
        let dir = MemoryDirectory::new("books");
        let (holder, _) = holder(&dir);
        assert!(holder.open_nrt_reader(true).unwrap().is_none());

        let writer = holder.get_writer(None).unwrap();
        writer.add_document("Book", "1", Document::new()).unwrap();
        let reader = holder.open_nrt_reader(false).unwrap().unwrap();
        assert!(reader.contains("Book", "1"));
        assert_eq!(holder.open_directory_reader().unwrap().num_docs(), 0);
    }

    #[test]
    fn test_rollback_reports_acknowledged_work() {
        let dir = MemoryDirectory::new("books");
        let (holder, handler) = holder(&dir);
        let writer = holder.get_writer(None).unwrap();
        let acknowledged = Operation::add("Book", "1", Document::new());
        writer.add_document("Book", "1", Document::new()).unwrap();
        holder.track_uncommitted([acknowledged.clone()]);

        holder.force_release_lock();
        assert_eq!(holder.uncommitted_len(), 0);
        let reports = handler.contexts();
        assert_eq!(reports.len(), 1, "Discarded work must be reported");
        assert_eq!(reports[0].all, vec![acknowledged.clone()]);
        assert_eq!(reports[0].failed, vec![acknowledged]);
        assert!(reports[0].cause.is_some());

        // Nothing tracked, nothing reported.
        holder.force_release_lock();
        assert_eq!(handler.contexts().len(), 1);
    }

    #[test]
    fn test_commit_forgets_only_durable_work() {
        let dir = MemoryDirectory::new("books");
        let (holder, handler) = holder(&dir);
        let writer = holder.get_writer(None).unwrap();
        writer.add_document("Book", "1", Document::new()).unwrap();
        holder.track_uncommitted([Operation::add("Book", "1", Document::new())]);

        dir.fail_next_commit();
        holder.commit(None);
        assert_eq!(holder.uncommitted_len(), 1, "A failed commit keeps the work tracked");
        assert_eq!(handler.exception_count(), 1);

        holder.commit(None);
        assert_eq!(holder.uncommitted_len(), 0);
        assert_eq!(dir.committed_len(), 1);
    }

    #[test]
    fn test_failed_close_reports_acknowledged_work() {
        let dir = MemoryDirectory::new("books");
        let (holder, handler) = holder(&dir);
        let writer = holder.get_writer(None).unwrap();
        writer.add_document("Book", "1", Document::new()).unwrap();
        holder.track_uncommitted([Operation::add("Book", "1", Document::new())]);

        dir.fail_next_close();
        holder.close();
        assert_eq!(handler.contexts().len(), 1);
        assert_eq!(handler.exception_count(), 1);
        assert!(!dir.is_locked());
    }

    /// Directory whose first writer pauses inside `rollback` after the
    /// engine released its lock, until the test lets it continue.
    #[derive(Debug)]
    struct PausingDirectory {
        inner: MemoryDirectory,
        pause: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    }

    #[derive(Debug)]
    struct PausingWriter {
        inner: Arc<dyn IndexWriter>,
        rolled_back: Sender<()>,
        resume: Receiver<()>,
    }

    impl IndexDirectory for PausingDirectory {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn open_writer(&self) -> Result<Arc<dyn IndexWriter>> {
            let inner = self.inner.open_writer()?;
            Ok(match self.pause.lock().take() {
                Some((rolled_back, resume)) => Arc::new(PausingWriter {
                    inner,
                    rolled_back,
                    resume,
                }),
                None => inner,
            })
        }

        fn open_reader(&self) -> Result<Box<dyn IndexReader>> {
            self.inner.open_reader()
        }

        fn is_locked(&self) -> bool {
            self.inner.is_locked()
        }

        fn force_unlock(&self) -> Result<()> {
            self.inner.force_unlock()
        }
    }

    impl IndexWriter for PausingWriter {
        fn add_document(&self, entity: &str, id: &str, document: Document) -> Result<()> {
            self.inner.add_document(entity, id, document)
        }

        fn update_document(&self, entity: &str, id: &str, document: Document) -> Result<()> {
            self.inner.update_document(entity, id, document)
        }

        fn delete_by_id(&self, id: &str) -> Result<()> {
            self.inner.delete_by_id(id)
        }

        fn delete_by_entity_and_id(&self, entity: &str, id: &str) -> Result<()> {
            self.inner.delete_by_entity_and_id(entity, id)
        }

        fn delete_all_of_type(&self, entity: &str) -> Result<()> {
            self.inner.delete_all_of_type(entity)
        }

        fn force_merge(&self) -> Result<()> {
            self.inner.force_merge()
        }

        fn commit(&self) -> Result<()> {
            self.inner.commit()
        }

        fn rollback(&self) -> Result<()> {
            self.inner.rollback()?;
            let _ = self.rolled_back.send(());
            let _ = self.resume.recv_timeout(Duration::from_secs(5));
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }

        fn open_reader(&self, apply_deletes: bool) -> Result<Box<dyn IndexReader>> {
            self.inner.open_reader(apply_deletes)
        }
    }

    #[test]
    fn test_forced_release_never_unlocks_a_newer_writer() {
        let (rolled_back_tx, rolled_back_rx) = crossbeam_channel::bounded(1);
        let (resume_tx, resume_rx) = crossbeam_channel::bounded(1);
        let inner = MemoryDirectory::new("books");
        let dir = PausingDirectory {
            inner: inner.clone(),
            pause: Mutex::new(Some((rolled_back_tx, resume_rx))),
        };
        let holder = IndexWriterHolder::new(
            "books",
            Arc::new(dir),
            Arc::new(RecordingErrorHandler::default()),
        );
        holder.get_writer(None).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| holder.force_release_lock());
            rolled_back_rx.recv().unwrap();

            // The engine lock is free while the release is still running.
            let reopen = s.spawn(|| holder.get_writer(None).is_some());
            std::thread::sleep(Duration::from_millis(30));
            resume_tx.send(()).unwrap();
            assert!(reopen.join().unwrap());
        });

        assert!(holder.is_open());
        assert!(
            inner.is_locked(),
            "The writer opened after the release must keep its lock"
        );
    }
}
