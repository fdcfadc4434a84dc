//! Near-real-time workspace.
//!
//! Readers are opened straight from the writer, so searches see changes
//! before they are committed. Reopening a reader is expensive; the
//! [`ReaderTracker`] only does it when a caller would otherwise see a stale
//! view.
//!
//! # Generations
//!
//! Every operation that reaches the writer raises a flag for the kind of
//! refresh it needs (writes, deletes or both). After a batch the flags are
//! swapped out and, if any was raised, one new generation id is minted and
//! recorded as the generation after which that kind of refresh is required.
//! A cached reader is fresh iff its generation is at least both required
//! generations.
//!
//! The counters are plain atomics without a common lock. A concurrent batch
//! may swap out flags raised by another batch and mint the generation for
//! both. Flags are raised only after the operation reached the writer, so any
//! generation minted after the swap covers it: the required generation may be
//! slightly stale (a refresh happens one generation early), never ahead of
//! the data it stands for. Counters only move forward.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::config::WorkspaceKind;
use crate::error::Result;
use crate::index::{ReaderLease, SharedReader};
use crate::operation::Operation;
use crate::workspace::holder::IndexWriterHolder;
use crate::workspace::{Workspace, WorkspaceCore};

/// Generation bookkeeping and the cached near-real-time reader.
pub struct ReaderTracker {
    next_generation: AtomicU64,
    write_required: AtomicU64,
    delete_required: AtomicU64,
    needs_write_flush: AtomicBool,
    needs_delete_flush: AtomicBool,
    current: RwLock<Option<SharedReader>>,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for ReaderTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderTracker")
            .field("write_required", &self.write_required_generation())
            .field("delete_required", &self.delete_required_generation())
            .field("cached", &self.cached_generation())
            .finish()
    }
}

impl Default for ReaderTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderTracker {
    pub fn new() -> Self {
        Self {
            next_generation: AtomicU64::new(1),
            write_required: AtomicU64::new(0),
            delete_required: AtomicU64::new(0),
            needs_write_flush: AtomicBool::new(false),
            needs_delete_flush: AtomicBool::new(false),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Record the refresh an applied operation requires.
    pub fn operation_applied(&self, operation: &Operation) {
        let requirement = operation.flush_requirement();
        if requirement.needs_writes() {
            self.needs_write_flush.store(true, Ordering::Release);
        }
        if requirement.needs_deletes() {
            self.needs_delete_flush.store(true, Ordering::Release);
        }
    }

    /// Mint a generation for the flags raised since the last call.
    ///
    /// Returns the new generation, or `None` if nothing needed a refresh.
    pub fn setup_new_reader_requirements(&self) -> Option<u64> {
        let writes = self.needs_write_flush.swap(false, Ordering::AcqRel);
        let deletes = self.needs_delete_flush.swap(false, Ordering::AcqRel);
        if !writes && !deletes {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        if writes {
            self.write_required.fetch_max(generation, Ordering::AcqRel);
        }
        if deletes {
            self.delete_required.fetch_max(generation, Ordering::AcqRel);
        }
        Some(generation)
    }

    pub fn write_required_generation(&self) -> u64 {
        self.write_required.load(Ordering::Acquire)
    }

    pub fn delete_required_generation(&self) -> u64 {
        self.delete_required.load(Ordering::Acquire)
    }

    fn required_generation(&self) -> u64 {
        self.write_required_generation()
            .max(self.delete_required_generation())
    }

    /// Generation of the cached reader, if one is cached.
    pub fn cached_generation(&self) -> Option<u64> {
        self.current.read().as_ref().map(SharedReader::generation)
    }

    /// Lease the cached reader if it is fresh.
    ///
    /// `None` either when stale or when it was closed between the freshness
    /// check and taking the reference.
    fn fresh_lease(&self) -> Option<ReaderLease> {
        let current = self.current.read();
        let reader = current.as_ref()?;
        if reader.generation() >= self.required_generation() {
            reader.lease()
        } else {
            None
        }
    }

    /// A reader reflecting at least every generation minted before the call.
    pub fn open_reader(&self, holder: &IndexWriterHolder) -> Result<ReaderLease> {
        loop {
            if let Some(lease) = self.fresh_lease() {
                return Ok(lease);
            }
            if let Some(lease) = self.refresh(holder)? {
                return Ok(lease);
            }
        }
    }

    /// Single-flight reopen of the cached reader.
    ///
    /// Returns `None` if the new reader was closed before it could be
    /// leased; the caller retries.
    fn refresh(&self, holder: &IndexWriterHolder) -> Result<Option<ReaderLease>> {
        let _refresh = self.refresh_lock.lock();
        if let Some(lease) = self.fresh_lease() {
            return Ok(Some(lease));
        }

        // Read the targets before opening: the reader sees at least the data
        // these generations stand for.
        let write_required = self.write_required_generation();
        let delete_required = self.delete_required_generation();
        let target = write_required.max(delete_required);
        let apply_deletes = self
            .cached_generation()
            .is_none_or(|generation| generation < delete_required);

        let reader = match holder.open_nrt_reader(apply_deletes)? {
            Some(reader) => reader,
            None => holder.open_directory_reader()?,
        };
        let fresh = SharedReader::new(reader, target);
        let lease = fresh.lease();

        let previous = self.current.write().replace(fresh);
        if let Some(previous) = previous {
            previous.dec_ref()?;
        }
        log::trace!(
            "refreshed reader of '{}' to generation {target}",
            holder.index_name()
        );
        Ok(lease)
    }

    /// Drop the cached reader. Leases still held keep it alive.
    pub fn release_cached(&self) {
        if let Some(previous) = self.current.write().take()
            && let Err(e) = previous.dec_ref()
        {
            log::warn!("failed to release cached reader: {e}");
        }
    }
}

/// Exclusive workspace serving near-real-time readers.
#[derive(Debug)]
pub struct NrtWorkspace {
    core: WorkspaceCore,
    tracker: ReaderTracker,
}

impl NrtWorkspace {
    pub fn new(core: WorkspaceCore) -> Self {
        Self {
            core,
            tracker: ReaderTracker::new(),
        }
    }

    pub fn tracker(&self) -> &ReaderTracker {
        &self.tracker
    }
}

impl Workspace for NrtWorkspace {
    fn core(&self) -> &WorkspaceCore {
        &self.core
    }

    fn kind(&self) -> WorkspaceKind {
        WorkspaceKind::NearRealTime
    }

    fn notify_work_applied(&self, operation: &Operation) {
        self.core.increment_modifications();
        self.tracker.operation_applied(operation);
    }

    fn after_batch_applied(&self, failed: bool, streaming: bool) {
        if failed {
            self.core.commit_policy().on_batch_applied(true, streaming);
            // The writer was dropped; readers must not keep serving its state.
            self.tracker.release_cached();
        } else if !streaming {
            self.tracker.setup_new_reader_requirements();
        }
    }

    /// Commits for durability; reads never need it.
    fn flush(&self) {
        self.core.commit_policy().on_flush();
        self.tracker.setup_new_reader_requirements();
    }

    fn open_reader(&self) -> Result<ReaderLease> {
        self.tracker.open_reader(self.core.holder())
    }

    fn shutdown(&self) {
        self.tracker.release_cached();
        self.core.commit_policy().stop();
        self.core.holder().close();
    }
}
