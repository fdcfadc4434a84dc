//! Non-blocking processor backed by a bounded executor.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::backend::changeset::{Changeset, Drained};
use crate::backend::processor::{InterruptFlag, SubmitOutcome, WorkProcessor};
use crate::backend::queue_task;
use crate::backend::resources::BackendResources;
use crate::config::ExecutionMode;
use crate::error::{Result, SluiceError};

/// Queues each submission as a task for a single executor thread.
///
/// The queue holds at most `max_queue_length` changesets; beyond that,
/// submitting blocks until the executor catches up.
pub struct AsyncWorkProcessor {
    index_name: String,
    resources: Arc<RwLock<Arc<BackendResources>>>,
    job_tx: RwLock<Option<Sender<Arc<Changeset>>>>,
    done_rx: Receiver<()>,
    executor: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl fmt::Debug for AsyncWorkProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncWorkProcessor")
            .field("index_name", &self.index_name)
            .field("queued", &self.queued())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl AsyncWorkProcessor {
    pub fn start(
        resources: Arc<BackendResources>,
        max_queue_length: usize,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let index_name = resources.config().index_name.clone();
        let resources = Arc::new(RwLock::new(resources));
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Arc<Changeset>>(max_queue_length);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let executor_resources = Arc::clone(&resources);
        let executor_name = index_name.clone();
        let executor = thread::Builder::new()
            .name(format!("sluice-async-{index_name}"))
            .spawn(move || {
                execute(&executor_name, &executor_resources, &job_rx);
                let _ = done_tx.send(());
            })?;
        log::debug!("started asynchronous processor for '{index_name}' (queue {max_queue_length})");

        Ok(Self {
            index_name,
            resources,
            job_tx: RwLock::new(Some(job_tx)),
            done_rx,
            executor: Mutex::new(Some(executor)),
            shutdown_timeout,
        })
    }

    /// Changesets waiting for the executor.
    pub fn queued(&self) -> usize {
        self.job_tx.read().as_ref().map_or(0, Sender::len)
    }
}

fn execute(
    index_name: &str,
    resources: &RwLock<Arc<BackendResources>>,
    jobs: &Receiver<Arc<Changeset>>,
) {
    // Ends once the processor dropped its sender and the queue is empty.
    for changeset in jobs.iter() {
        let batch = Drained::single(changeset);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            queue_task::run(resources, &batch, false);
        }));
        if outcome.is_err() {
            log::error!("applying queued work to '{index_name}' panicked");
        }
    }
    log::debug!("asynchronous processor of '{index_name}' drained");
}

impl WorkProcessor for AsyncWorkProcessor {
    fn submit(
        &self,
        changeset: Arc<Changeset>,
        _interrupt: Option<&InterruptFlag>,
    ) -> Result<SubmitOutcome> {
        let job_tx = self.job_tx.read();
        let Some(sender) = job_tx.as_ref() else {
            return Err(SluiceError::invalid_operation(format!(
                "processor of '{}' is shut down",
                self.index_name
            )));
        };
        sender.send(changeset).map_err(|_| {
            SluiceError::internal(format!("executor of '{}' is gone", self.index_name))
        })?;
        Ok(SubmitOutcome::Queued)
    }

    fn update_resources(&self, resources: Arc<BackendResources>) {
        *self.resources.write() = resources;
    }

    fn shutdown(&self) {
        drop(self.job_tx.write().take());
        let Some(executor) = self.executor.lock().take() else {
            return;
        };
        match self.done_rx.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if executor.join().is_err() {
                    log::error!("executor thread of '{}' panicked", self.index_name);
                }
            }
            Err(RecvTimeoutError::Timeout) => log::warn!(
                "executor of '{}' did not finish queued work within {:?}",
                self.index_name,
                self.shutdown_timeout
            ),
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }
}

impl Drop for AsyncWorkProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::data::Document;
    use crate::index::memory::MemoryDirectory;
    use crate::operation::Operation;
    use crate::test_util::RecordingErrorHandler;

    fn resources(dir: &MemoryDirectory, types: &[&str]) -> Arc<BackendResources> {
        let config = IndexConfig::builder()
            .index_name("books")
            .worker_threads(1)
            .build()
            .unwrap();
        Arc::new(
            BackendResources::new(
                &config,
                Arc::new(dir.clone()),
                Arc::new(RecordingErrorHandler::default()),
                types.iter().map(|t| t.to_string()),
            )
            .unwrap(),
        )
    }

    fn changeset(id: &str) -> Arc<Changeset> {
        Arc::new(Changeset::new(
            vec![Operation::add("Book", id, Document::new())],
            None,
        ))
    }

    #[test]
    fn test_submit_returns_before_application() {
        let dir = MemoryDirectory::new("books");
        let processor =
            AsyncWorkProcessor::start(resources(&dir, &["Book"]), 16, Duration::from_secs(5))
                .unwrap();

        let last = changeset("9");
        for i in 0..9 {
            let outcome = processor.submit(changeset(&i.to_string()), None).unwrap();
            assert_eq!(outcome, SubmitOutcome::Queued);
        }
        processor.submit(Arc::clone(&last), None).unwrap();
        assert!(last.wait_processed(None));
        assert_eq!(dir.committed_len(), 10);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = MemoryDirectory::new("books");
        let processor =
            AsyncWorkProcessor::start(resources(&dir, &["Book"]), 4, Duration::from_secs(5))
                .unwrap();
        for i in 0..20 {
            processor.submit(changeset(&i.to_string()), None).unwrap();
        }
        processor.shutdown();
        assert_eq!(dir.committed_len(), 20);
        assert!(processor.submit(changeset("x"), None).is_err());
    }

    #[test]
    fn test_update_resources_redirects_work() {
        let first = MemoryDirectory::new("books");
        let second = MemoryDirectory::new("books");
        let processor =
            AsyncWorkProcessor::start(resources(&first, &["Book"]), 4, Duration::from_secs(5))
                .unwrap();

        let cs = changeset("1");
        processor.submit(Arc::clone(&cs), None).unwrap();
        cs.wait_processed(None);

        processor.update_resources(resources(&second, &["Book"]));
        let cs = changeset("2");
        processor.submit(Arc::clone(&cs), None).unwrap();
        cs.wait_processed(None);

        assert_eq!(first.committed_len(), 1);
        assert_eq!(second.committed_len(), 1);
    }
}
