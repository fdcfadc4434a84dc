//! When the writer is committed, closed or left open.
//!
//! A [`CommitPolicy`] is consulted after every batch and on explicit flush
//! requests. The variant is chosen once from the index configuration:
//!
//! - `PerChangeset` commits after every non-streaming batch.
//! - `Scheduled` leaves committing to a background timer; a crash between a
//!   batch and the next tick loses the uncommitted batch.
//! - `SharedRefCounted` counts the users of the writer and closes it when the
//!   last one leaves, so other processes can take the lock.
//! - `NearRealTime` never commits per batch; readers come from the writer.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::Result;
use crate::error_handler::ErrorContextBuilder;
use crate::index::IndexWriter;
use crate::workspace::holder::IndexWriterHolder;

/// Which commit policy a workspace runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicyKind {
    PerChangeset,
    Scheduled { delay: Duration },
    SharedRefCounted,
    NearRealTime,
}

#[derive(Debug, Default)]
struct SharedUsers {
    open_users: usize,
    close_on_next_exit: bool,
    /// A batch failed while other users still held the writer.
    failure_pending: bool,
}

struct ScheduledCommit {
    stop_tx: Mutex<Option<Sender<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledCommit {
    fn start(holder: Arc<IndexWriterHolder>, delay: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let timer = thread::Builder::new()
            .name(format!("sluice-commit-{}", holder.index_name()))
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(delay) {
                    if holder.is_open() {
                        holder.commit(None);
                    }
                }
                log::debug!("commit timer of '{}' stopped", holder.index_name());
            })?;
        Ok(Self {
            stop_tx: Mutex::new(Some(stop_tx)),
            timer: Mutex::new(Some(timer)),
        })
    }

    fn stop(&self) {
        // Dropping the sender disconnects the stop channel and wakes the timer.
        drop(self.stop_tx.lock().take());
        if let Some(timer) = self.timer.lock().take()
            && timer.join().is_err()
        {
            log::error!("commit timer thread panicked");
        }
    }
}

enum PolicyState {
    PerChangeset,
    Scheduled(ScheduledCommit),
    Shared(Mutex<SharedUsers>),
    NearRealTime,
}

/// Commit/close decisions for one writer holder.
pub struct CommitPolicy {
    holder: Arc<IndexWriterHolder>,
    kind: CommitPolicyKind,
    state: PolicyState,
}

impl fmt::Debug for CommitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitPolicy")
            .field("kind", &self.kind)
            .field("holder", &self.holder)
            .finish()
    }
}

impl CommitPolicy {
    /// Create a policy. `Scheduled` starts its timer thread here.
    pub fn new(kind: CommitPolicyKind, holder: Arc<IndexWriterHolder>) -> Result<Self> {
        let state = match kind {
            CommitPolicyKind::PerChangeset => PolicyState::PerChangeset,
            CommitPolicyKind::Scheduled { delay } => {
                PolicyState::Scheduled(ScheduledCommit::start(Arc::clone(&holder), delay)?)
            }
            CommitPolicyKind::SharedRefCounted => {
                PolicyState::Shared(Mutex::new(SharedUsers::default()))
            }
            CommitPolicyKind::NearRealTime => PolicyState::NearRealTime,
        };
        Ok(Self {
            holder,
            kind,
            state,
        })
    }

    pub fn kind(&self) -> CommitPolicyKind {
        self.kind
    }

    pub fn holder(&self) -> &Arc<IndexWriterHolder> {
        &self.holder
    }

    /// Acquire the writer for one batch.
    ///
    /// Under `SharedRefCounted` every successful acquisition must be paired
    /// with one [`CommitPolicy::on_batch_applied`].
    pub fn get_writer(
        &self,
        context: Option<&mut ErrorContextBuilder>,
    ) -> Option<Arc<dyn IndexWriter>> {
        match &self.state {
            PolicyState::Shared(users) => {
                // Counted under the same lock as close so a concurrent last
                // exit cannot close the writer just handed out.
                let mut users = users.lock();
                let writer = self.holder.get_writer(context)?;
                users.open_users += 1;
                Some(writer)
            }
            _ => self.holder.get_writer(context),
        }
    }

    /// A batch finished. On failure the writer is dropped without committing.
    pub fn on_batch_applied(&self, failed: bool, streaming: bool) {
        match &self.state {
            PolicyState::PerChangeset => {
                if failed {
                    self.holder.force_release_lock();
                } else if !streaming {
                    self.holder.commit(None);
                }
            }
            PolicyState::Scheduled(_) | PolicyState::NearRealTime => {
                if failed {
                    self.holder.force_release_lock();
                }
            }
            PolicyState::Shared(users) => {
                let mut users = users.lock();
                if users.open_users == 0 {
                    log::warn!(
                        "writer of '{}' released more often than acquired",
                        self.holder.index_name()
                    );
                } else {
                    users.open_users -= 1;
                }
                users.failure_pending |= failed;

                if users.open_users == 0 {
                    if users.failure_pending {
                        self.holder.force_release_lock();
                        users.failure_pending = false;
                        users.close_on_next_exit = false;
                    } else if !streaming || users.close_on_next_exit {
                        self.holder.close();
                        users.close_on_next_exit = false;
                    }
                } else if !streaming && !users.failure_pending {
                    // A failed user's partial writes share the writer until the last exit.
                    self.holder.commit(None);
                }
            }
        }
    }

    /// Explicit durability barrier.
    pub fn on_flush(&self) {
        match &self.state {
            PolicyState::Shared(users) => {
                let mut users = users.lock();
                if users.open_users == 0 {
                    self.holder.close();
                } else {
                    if !users.failure_pending {
                        self.holder.commit(None);
                    }
                    users.close_on_next_exit = true;
                }
            }
            _ => self.holder.commit(None),
        }
    }

    /// Number of batches currently holding the writer (shared policy only).
    pub fn open_users(&self) -> usize {
        match &self.state {
            PolicyState::Shared(users) => users.lock().open_users,
            _ => 0,
        }
    }

    /// Stop background activity. Idempotent.
    pub fn stop(&self) {
        if let PolicyState::Scheduled(scheduled) = &self.state {
            scheduled.stop();
        }
    }
}

impl Drop for CommitPolicy {
    fn drop(&mut self) {
        self.stop();
    }
}
