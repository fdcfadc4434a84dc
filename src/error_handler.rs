//! Failure reporting channel.
//!
//! Failures on the consumer side never reach the producer. They are packed
//! into an [`ErrorContext`] (which operations were attempted, which completed,
//! which failed, and why) and handed to an injected [`ErrorHandler`].
//! Handlers are fire-and-forget: nothing they do feeds back into the engine.

use std::fmt;
use std::sync::Arc;

use crate::error::SluiceError;
use crate::operation::Operation;

/// Receives failure reports.
pub trait ErrorHandler: Send + Sync + fmt::Debug {
    /// A batch (or part of one) failed.
    fn handle(&self, context: &ErrorContext);

    /// A failure with no batch attached, e.g. a background commit.
    fn handle_exception(&self, message: &str, error: &SluiceError);
}

/// Structured description of a failed batch.
#[derive(Debug)]
pub struct ErrorContext {
    index_name: Option<String>,
    all_operations: Vec<Operation>,
    completed: Vec<Operation>,
    failed: Vec<Operation>,
    operation_at_fault: Option<Operation>,
    cause: Option<SluiceError>,
}

impl ErrorContext {
    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    /// Every operation the batch attempted.
    pub fn all_operations(&self) -> &[Operation] {
        &self.all_operations
    }

    pub fn completed(&self) -> &[Operation] {
        &self.completed
    }

    pub fn failed(&self) -> &[Operation] {
        &self.failed
    }

    pub fn operation_at_fault(&self) -> Option<&Operation> {
        self.operation_at_fault.as_ref()
    }

    pub fn cause(&self) -> Option<&SluiceError> {
        self.cause.as_ref()
    }

    /// Operations that neither completed nor were reported as failed.
    pub fn pending(&self) -> Vec<&Operation> {
        self.all_operations
            .iter()
            .filter(|op| !self.completed.contains(op) && !self.failed.contains(op))
            .collect()
    }
}

/// Accumulates the state of an in-flight batch until a failure needs reporting.
#[derive(Debug, Default)]
pub struct ErrorContextBuilder {
    index_name: Option<String>,
    all_operations: Vec<Operation>,
    completed: Vec<Operation>,
    failed: Vec<Operation>,
    operation_at_fault: Option<Operation>,
    cause: Option<SluiceError>,
}

impl ErrorContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    pub fn all_work_to_be_done(mut self, operations: Vec<Operation>) -> Self {
        self.all_operations = operations;
        self
    }

    pub fn set_error(&mut self, error: SluiceError) {
        self.cause = Some(error);
    }

    pub fn error_then(mut self, error: SluiceError) -> Self {
        self.set_error(error);
        self
    }

    pub fn set_operation_at_fault(&mut self, operation: Operation) {
        self.operation_at_fault = Some(operation);
    }

    pub fn add_failed(&mut self, operation: Operation) {
        self.failed.push(operation);
    }

    pub fn work_completed(&mut self, operation: Operation) {
        self.completed.push(operation);
    }

    /// Whether anything failed so far.
    pub fn has_failures(&self) -> bool {
        self.cause.is_some() || !self.failed.is_empty()
    }

    pub fn build(self) -> ErrorContext {
        ErrorContext {
            index_name: self.index_name,
            all_operations: self.all_operations,
            completed: self.completed,
            failed: self.failed,
            operation_at_fault: self.operation_at_fault,
            cause: self.cause,
        }
    }
}

/// Default handler: writes every report to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl LogErrorHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> Arc<dyn ErrorHandler> {
        Arc::new(Self)
    }
}

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, context: &ErrorContext) {
        let index = context.index_name().unwrap_or("<unknown>");
        let cause = context
            .cause()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown cause".to_string());
        log::error!(
            "indexing failure on '{index}': {cause}; at fault: {:?}; failed: {:?}",
            context.operation_at_fault(),
            context.failed()
        );
        let pending = context.pending();
        if !pending.is_empty() {
            log::error!("operations of '{index}' left unapplied: {pending:?}");
        }
    }

    fn handle_exception(&self, message: &str, error: &SluiceError) {
        log::error!("{message}: {error}");
    }
}
