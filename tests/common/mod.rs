#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sluice::index::memory::MemoryDirectory;
use sluice::{ErrorContext, ErrorHandler, IndexBackend, IndexConfig, Operation, SluiceError};

/// Error handler that keeps what it was given.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    reports: Mutex<Vec<Vec<Operation>>>,
    failed: Mutex<Vec<Operation>>,
    exceptions: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `all_operations` of every report, in order.
    pub fn reports(&self) -> Vec<Vec<Operation>> {
        self.reports.lock().clone()
    }

    pub fn failed(&self) -> Vec<Operation> {
        self.failed.lock().clone()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().clone()
    }
}

impl ErrorHandler for RecordingHandler {
    fn handle(&self, context: &ErrorContext) {
        self.reports.lock().push(context.all_operations().to_vec());
        self.failed.lock().extend(context.failed().iter().cloned());
    }

    fn handle_exception(&self, message: &str, error: &SluiceError) {
        self.exceptions.lock().push(format!("{message}: {error}"));
    }
}

pub fn backend(
    config: IndexConfig,
    directory: &MemoryDirectory,
    handler: Arc<RecordingHandler>,
    types: &[&str],
) -> IndexBackend {
    IndexBackend::new(
        config,
        Arc::new(directory.clone()),
        handler,
        types.iter().map(|t| t.to_string()).collect(),
    )
    .unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

pub fn ids(directory: &MemoryDirectory) -> Vec<String> {
    directory
        .committed_ids()
        .into_iter()
        .map(|(_, id)| id)
        .collect()
}
