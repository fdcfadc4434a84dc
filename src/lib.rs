//! # Sluice
//!
//! The write/commit engine of a text-indexing backend.
//!
//! ## Features
//!
//! - One lazily opened, lock-protected writer per index
//! - Per-changeset, scheduled and shared (reference-counted) commit policies
//! - Exclusive, shared and near-real-time workspaces
//! - Synchronous and asynchronous work processors with batched submission
//! - Intra-batch fan-out that keeps per-document order
//! - Generation-tracked, reference-counted near-real-time readers
//! - Structured failure reports instead of lost work

// Core modules
pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod error_handler;
pub mod index;
pub mod monitor;
pub mod operation;
pub mod optimizer;
pub mod workspace;

#[cfg(test)]
mod test_util;

// Re-exports for the public API
pub use backend::{BackendStats, IndexBackend, InterruptFlag, SubmitOutcome};
pub use config::{ExecutionMode, IndexConfig, OwnershipMode, WorkspaceKind};
pub use data::{DataValue, Document};
pub use error::{Result, SluiceError};
pub use error_handler::{ErrorContext, ErrorContextBuilder, ErrorHandler, LogErrorHandler};
pub use index::{IndexDirectory, IndexReader, IndexWriter, ReaderLease, SharedReader};
pub use monitor::{CountingMonitor, IndexingMonitor};
pub use operation::{FlushRequirement, Operation};
pub use optimizer::{OptimizerConfig, OptimizerStrategy};
pub use workspace::{CommitPolicyKind, Workspace};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
