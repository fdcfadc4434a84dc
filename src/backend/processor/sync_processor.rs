//! Blocking processor with a single consumer thread.
//!
//! Producers append their changeset to a shared list, wake the consumer and
//! wait for the changeset to be marked processed. The consumer drains the
//! whole list at once and applies it as one queue task, so concurrent
//! producers share a single commit.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use crate::backend::changeset::{Changeset, ChangesetList};
use crate::backend::processor::{InterruptFlag, SubmitOutcome, WorkProcessor};
use crate::backend::queue_task;
use crate::backend::resources::BackendResources;
use crate::config::ExecutionMode;
use crate::error::{Result, SluiceError};

/// Longest the consumer sleeps without a wake-up signal.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Interval at which a slow shutdown is logged.
const SHUTDOWN_LOG_INTERVAL: Duration = Duration::from_secs(5);

struct Shared {
    index_name: String,
    list: ChangesetList,
    resources: RwLock<Arc<BackendResources>>,
    stopped: AtomicBool,
    wake_rx: Receiver<()>,
}

pub struct SyncWorkProcessor {
    shared: Arc<Shared>,
    wake_tx: Sender<()>,
    /// Held shared by producers while appending, exclusively to stop.
    gate: RwLock<()>,
    done_rx: Receiver<()>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SyncWorkProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncWorkProcessor")
            .field("index_name", &self.shared.index_name)
            .field("pending", &self.shared.list.len())
            .field("stopped", &self.shared.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl SyncWorkProcessor {
    pub fn start(resources: Arc<BackendResources>) -> Result<Self> {
        let index_name = resources.config().index_name.clone();
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let shared = Arc::new(Shared {
            index_name: index_name.clone(),
            list: ChangesetList::new(),
            resources: RwLock::new(resources),
            stopped: AtomicBool::new(false),
            wake_rx,
        });

        let consumer_shared = Arc::clone(&shared);
        let consumer = thread::Builder::new()
            .name(format!("sluice-sync-{index_name}"))
            .spawn(move || {
                consume(&consumer_shared);
                let _ = done_tx.send(());
            })?;
        log::debug!("started synchronous processor for '{index_name}'");

        Ok(Self {
            shared,
            wake_tx,
            gate: RwLock::new(()),
            done_rx,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    fn wake(&self) {
        match self.wake_tx.try_send(()) {
            // A pending signal already guarantees another drain.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                log::warn!(
                    "consumer of '{}' is gone; work will not be applied",
                    self.shared.index_name
                );
            }
        }
    }
}

fn consume(shared: &Shared) {
    loop {
        // Read the flag before draining: everything appended before the
        // stop was published is then picked up by this drain.
        let stopping = shared.stopped.load(Ordering::Acquire);
        let batch = shared.list.drain();
        if !batch.is_empty() {
            log::trace!(
                "applying {} changesets ({} operations) to '{}'",
                batch.len(),
                batch.operation_count(),
                shared.index_name
            );
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                queue_task::run(&shared.resources, &batch, false);
            }));
            if outcome.is_err() {
                log::error!(
                    "applying a batch to '{}' panicked; its producers are released",
                    shared.index_name
                );
            }
            // Dropping the batch marks every changeset processed.
            drop(batch);
            continue;
        }
        if stopping {
            break;
        }
        match shared.wake_rx.recv_timeout(IDLE_WAIT) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // The processor is gone; finish whatever is left.
                shared.stopped.store(true, Ordering::Release);
            }
        }
    }
    log::debug!("synchronous processor of '{}' stopped", shared.index_name);
}

impl WorkProcessor for SyncWorkProcessor {
    fn submit(
        &self,
        changeset: Arc<Changeset>,
        interrupt: Option<&InterruptFlag>,
    ) -> Result<SubmitOutcome> {
        {
            let _gate = self.gate.read();
            if self.shared.stopped.load(Ordering::Acquire) {
                return Err(SluiceError::invalid_operation(format!(
                    "processor of '{}' is shut down",
                    self.shared.index_name
                )));
            }
            self.shared.list.add(Arc::clone(&changeset));
        }
        self.wake();

        if changeset.wait_processed(interrupt) {
            Ok(SubmitOutcome::Processed)
        } else {
            log::debug!(
                "producer of '{}' interrupted while waiting; the changeset may still be applied",
                self.shared.index_name
            );
            Ok(SubmitOutcome::Interrupted)
        }
    }

    fn update_resources(&self, resources: Arc<BackendResources>) {
        *self.shared.resources.write() = resources;
    }

    fn shutdown(&self) {
        {
            let _gate = self.gate.write();
            self.shared.stopped.store(true, Ordering::Release);
        }
        self.wake();

        let Some(consumer) = self.consumer.lock().take() else {
            return;
        };
        loop {
            match self.done_rx.recv_timeout(SHUTDOWN_LOG_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => log::warn!(
                    "still waiting for the consumer of '{}' to finish ({} changesets pending)",
                    self.shared.index_name,
                    self.shared.list.len()
                ),
            }
        }
        if consumer.join().is_err() {
            log::error!("consumer thread of '{}' panicked", self.shared.index_name);
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }
}

impl Drop for SyncWorkProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
