//! Consumers of submitted work.
//!
//! [`SyncWorkProcessor`] runs one consumer thread and blocks producers until
//! their changeset was applied. [`AsyncWorkProcessor`] queues work on a
//! bounded executor and returns immediately.

pub mod async_processor;
pub mod sync_processor;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::changeset::Changeset;
use crate::backend::resources::BackendResources;
use crate::config::{ExecutionMode, IndexConfig};
use crate::error::Result;

pub use async_processor::AsyncWorkProcessor;
pub use sync_processor::SyncWorkProcessor;

/// Cooperative interruption of a waiting producer.
///
/// Raising the flag makes a blocked submission return
/// [`SubmitOutcome::Interrupted`]. The flag stays raised; the caller clears
/// it once handled.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }
}

/// What a submission knows about its work when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The changeset was applied, or its failure reported.
    Processed,
    /// Accepted for asynchronous application.
    Queued,
    /// The wait was interrupted. The work may or may not be applied later.
    Interrupted,
}

pub trait WorkProcessor: Send + Sync + fmt::Debug {
    /// Hand a changeset to the consumer side.
    fn submit(
        &self,
        changeset: Arc<Changeset>,
        interrupt: Option<&InterruptFlag>,
    ) -> Result<SubmitOutcome>;

    /// Point the processor at new resources after a reconfiguration.
    fn update_resources(&self, resources: Arc<BackendResources>);

    /// Apply everything already submitted, then stop. Idempotent.
    fn shutdown(&self);

    fn execution_mode(&self) -> ExecutionMode;
}

/// Start the processor `config` asks for.
pub fn start_processor(
    config: &IndexConfig,
    resources: Arc<BackendResources>,
) -> Result<Box<dyn WorkProcessor>> {
    Ok(match config.execution {
        ExecutionMode::Sync => Box::new(SyncWorkProcessor::start(resources)?),
        ExecutionMode::Async => Box::new(AsyncWorkProcessor::start(
            resources,
            config.max_queue_length,
            config.shutdown_timeout(),
        )?),
    })
}
