//! Helpers shared by unit tests.

use parking_lot::Mutex;

use crate::error::SluiceError;
use crate::error_handler::{ErrorContext, ErrorHandler};
use crate::operation::Operation;

/// Snapshot of one reported [`ErrorContext`].
#[derive(Debug, Clone)]
pub struct Report {
    pub all: Vec<Operation>,
    pub completed: Vec<Operation>,
    pub failed: Vec<Operation>,
    pub at_fault: Option<Operation>,
    pub cause: Option<String>,
}

/// Error handler that keeps every report for later inspection.
#[derive(Debug, Default)]
pub struct RecordingErrorHandler {
    contexts: Mutex<Vec<Report>>,
    exceptions: Mutex<Vec<String>>,
}

impl RecordingErrorHandler {
    pub fn contexts(&self) -> Vec<Report> {
        self.contexts.lock().clone()
    }

    pub fn exception_count(&self) -> usize {
        self.exceptions.lock().len()
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle(&self, context: &ErrorContext) {
        self.contexts.lock().push(Report {
            all: context.all_operations().to_vec(),
            completed: context.completed().to_vec(),
            failed: context.failed().to_vec(),
            at_fault: context.operation_at_fault().cloned(),
            cause: context.cause().map(|e| e.to_string()),
        });
    }

    fn handle_exception(&self, message: &str, error: &SluiceError) {
        self.exceptions.lock().push(format!("{message}: {error}"));
    }
}
