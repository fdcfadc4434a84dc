//! Units of submitted work and their multi-producer aggregation.
//!
//! Producers append [`Changeset`]s to a [`ChangesetList`]; the consumer takes
//! the whole list at once with [`ChangesetList::drain`]. The returned
//! [`Drained`] batch marks every changeset processed when it is dropped, so
//! no producer is left waiting even if applying the batch panicked.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::backend::processor::InterruptFlag;
use crate::monitor::IndexingMonitor;
use crate::operation::Operation;

/// Upper bound of a single wait on the completion signal. Waiters re-check
/// the flag (and interruption) at least this often.
const WAIT_SAFETY_MARGIN: Duration = Duration::from_millis(20);

/// One producer's batch of operations.
pub struct Changeset {
    operations: Vec<Operation>,
    producer: ThreadId,
    monitor: Option<Arc<dyn IndexingMonitor>>,
    processed: Mutex<bool>,
    signal: Condvar,
}

impl fmt::Debug for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Changeset")
            .field("operations", &self.operations.len())
            .field("producer", &self.producer)
            .field("processed", &self.is_processed())
            .finish()
    }
}

impl Changeset {
    /// Create a changeset owned by the calling thread.
    pub fn new(operations: Vec<Operation>, monitor: Option<Arc<dyn IndexingMonitor>>) -> Self {
        Self {
            operations,
            producer: thread::current().id(),
            monitor,
            processed: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn producer(&self) -> ThreadId {
        self.producer
    }

    pub fn monitor(&self) -> Option<&Arc<dyn IndexingMonitor>> {
        self.monitor.as_ref()
    }

    pub fn is_processed(&self) -> bool {
        *self.processed.lock()
    }

    /// Flag the changeset as done and wake its producer.
    pub fn mark_processed(&self) {
        let mut processed = self.processed.lock();
        if !*processed {
            *processed = true;
            self.signal.notify_all();
        }
    }

    /// Block until processed.
    ///
    /// With an interrupt flag, returns `false` as soon as it is raised
    /// instead of continuing to wait. The flag is left raised and the
    /// changeset stays queued, so it may still be applied later: callers
    /// must treat `false` as an unknown outcome, not as an abort.
    pub fn wait_processed(&self, interrupt: Option<&InterruptFlag>) -> bool {
        let mut processed = self.processed.lock();
        while !*processed {
            if interrupt.is_some_and(InterruptFlag::is_interrupted) {
                return false;
            }
            self.signal.wait_for(&mut processed, WAIT_SAFETY_MARGIN);
        }
        true
    }
}

/// Changesets appended by many producers, drained by one consumer.
#[derive(Debug, Default)]
pub struct ChangesetList {
    pending: Mutex<Vec<Arc<Changeset>>>,
}

impl ChangesetList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, changeset: Arc<Changeset>) {
        self.pending.lock().push(changeset);
    }

    /// Detach everything appended so far, in append order.
    pub fn drain(&self) -> Drained {
        let changesets = mem::take(&mut *self.pending.lock());
        Drained { changesets }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A detached batch. Dropping it marks every changeset processed.
#[derive(Debug)]
pub struct Drained {
    changesets: Vec<Arc<Changeset>>,
}

impl Drained {
    pub fn single(changeset: Arc<Changeset>) -> Self {
        Self {
            changesets: vec![changeset],
        }
    }

    pub fn changesets(&self) -> &[Arc<Changeset>] {
        &self.changesets
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    /// Total number of operations across the batch.
    pub fn operation_count(&self) -> usize {
        self.changesets.iter().map(|c| c.operations().len()).sum()
    }
}

impl Drop for Drained {
    fn drop(&mut self) {
        for changeset in &self.changesets {
            changeset.mark_processed();
        }
    }
}
