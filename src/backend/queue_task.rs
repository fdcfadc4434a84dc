//! Application of one batch to the writer.
//!
//! The queue task is the only code that mutates the writer. It runs under
//! the shared side of the modification lock, so any number of tasks may run
//! while a reconfiguration waits for the exclusive side.
//!
//! A batch with more than one operation is fanned out over the worker pool.
//! Operations on the same document id go to the same lane and keep their
//! order; index-wide operations (purge, optimize, flush) are barriers that
//! run alone between fan-out rounds. Every operation is attempted: a failure
//! is recorded against that operation and the siblings proceed.

use std::ops::Range;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use rayon::ThreadPool;
use rayon::prelude::*;

use crate::backend::changeset::{Changeset, Drained};
use crate::backend::resources::BackendResources;
use crate::error::{Result, SluiceError};
use crate::error_handler::ErrorContextBuilder;
use crate::index::IndexWriter;
use crate::monitor::IndexingMonitor;
use crate::operation::Operation;

/// Apply a drained batch against whatever resources are current once the
/// shared modification lock is held.
pub fn run(slot: &RwLock<Arc<BackendResources>>, batch: &Drained, streaming: bool) {
    if batch.operation_count() == 0 {
        return;
    }
    // Every generation of resources shares one lock, so it can be taken
    // before knowing which generation will be current.
    let lock = Arc::clone(slot.read().modification_lock());
    let _shared = lock.read();
    let resources = Arc::clone(&*slot.read());
    QueueTask::new(&resources, streaming).apply(batch.changesets());
}

/// Apply a single operation in the calling thread without a per-operation commit.
pub fn run_streaming(
    slot: &RwLock<Arc<BackendResources>>,
    operation: Operation,
    monitor: Option<Arc<dyn IndexingMonitor>>,
) {
    let batch = Drained::single(Arc::new(Changeset::new(vec![operation], monitor)));
    run(slot, &batch, true);
}

struct Entry<'a> {
    operation: &'a Operation,
    monitor: Option<&'a Arc<dyn IndexingMonitor>>,
}

pub struct QueueTask<'a> {
    resources: &'a BackendResources,
    streaming: bool,
    single_term_deletes: bool,
}

impl<'a> QueueTask<'a> {
    pub fn new(resources: &'a BackendResources, streaming: bool) -> Self {
        Self {
            resources,
            streaming,
            single_term_deletes: resources.workspace().are_single_term_deletes_safe(),
        }
    }

    /// Apply every operation of `changesets`, in order, then hand the
    /// outcome to the workspace.
    pub fn apply(&self, changesets: &[Arc<Changeset>]) {
        let workspace = self.resources.workspace();
        let entries: Vec<Entry<'_>> = changesets
            .iter()
            .flat_map(|changeset| {
                changeset.operations().iter().map(move |operation| Entry {
                    operation,
                    monitor: changeset.monitor(),
                })
            })
            .collect();
        if entries.is_empty() {
            return;
        }

        let mut context = ErrorContextBuilder::new()
            .index_name(workspace.index_name())
            .all_work_to_be_done(entries.iter().map(|e| e.operation.clone()).collect());

        let Some(writer) = workspace.get_index_writer(Some(&mut context)) else {
            log::warn!(
                "abandoning batch of {} operations on '{}': no writer available after a previous failure",
                entries.len(),
                workspace.index_name()
            );
            self.resources
                .stats_counters()
                .record_batch(0, entries.len() as u64);
            return;
        };

        let operations: Vec<&Operation> = entries.iter().map(|e| e.operation).collect();
        let outcomes = self.apply_operations(writer.as_ref(), &operations);

        let mut applied = 0u64;
        let mut failed = 0u64;
        let mut flush_requested = false;
        for (entry, outcome) in entries.iter().zip(outcomes) {
            let operation = entry.operation;
            match outcome {
                Ok(()) => {
                    workspace.notify_work_applied(operation);
                    context.work_completed(operation.clone());
                    let documents = operation.documents_added();
                    if let Some(monitor) = entry.monitor
                        && documents > 0
                    {
                        monitor.documents_added(documents);
                    }
                    flush_requested |= matches!(operation, Operation::Flush);
                    applied += 1;
                }
                Err(e) => {
                    log::debug!("operation {operation:?} failed: {e}");
                    if failed == 0 {
                        context.set_operation_at_fault(operation.clone());
                        context.set_error(e);
                    }
                    context.add_failed(operation.clone());
                    failed += 1;
                }
            }
        }

        let has_failures = failed > 0;
        if has_failures {
            self.resources.error_handler().handle(&context.build());
        } else {
            workspace.writer_holder().track_uncommitted(
                operations
                    .iter()
                    .filter(|operation| operation.entity().is_some())
                    .map(|&operation| operation.clone()),
            );
            if let Err(e) = workspace.optimizer_phase(writer.as_ref()) {
                workspace.writer_holder().handle_failure(e, None);
            }
        }
        drop(writer);

        workspace.after_batch_applied(has_failures, self.streaming);
        if flush_requested && !has_failures {
            workspace.flush();
        }
        self.resources.stats_counters().record_batch(applied, failed);
    }

    /// One outcome per operation, in input order.
    fn apply_operations(&self, writer: &dyn IndexWriter, operations: &[&Operation]) -> Vec<Result<()>> {
        match self.resources.worker_pool() {
            Some(pool) if operations.len() > 1 => self.fan_out(pool, writer, operations),
            _ => operations
                .iter()
                .map(|operation| self.apply_operation(writer, operation))
                .collect(),
        }
    }

    fn fan_out(
        &self,
        pool: &ThreadPool,
        writer: &dyn IndexWriter,
        operations: &[&Operation],
    ) -> Vec<Result<()>> {
        let mut outcomes: Vec<Option<Result<()>>> = operations.iter().map(|_| None).collect();
        let mut start = 0;
        while start < operations.len() {
            if operations[start].is_index_wide() {
                outcomes[start] = Some(self.apply_operation(writer, operations[start]));
                start += 1;
                continue;
            }
            let end = operations[start..]
                .iter()
                .position(|operation| operation.is_index_wide())
                .map_or(operations.len(), |offset| start + offset);
            for (index, outcome) in self.apply_round(pool, writer, operations, start..end) {
                outcomes[index] = Some(outcome);
            }
            start = end;
        }
        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| Err(SluiceError::internal("operation was never attempted")))
            })
            .collect()
    }

    /// Apply a run of document-level operations, one lane per document id.
    fn apply_round(
        &self,
        pool: &ThreadPool,
        writer: &dyn IndexWriter,
        operations: &[&Operation],
        range: Range<usize>,
    ) -> Vec<(usize, Result<()>)> {
        let mut lanes: Vec<Vec<usize>> = Vec::new();
        let mut lane_of: AHashMap<&str, usize> = AHashMap::new();
        for index in range {
            let id = operations[index].id().unwrap_or_default();
            let lane = *lane_of.entry(id).or_insert_with(|| {
                lanes.push(Vec::new());
                lanes.len() - 1
            });
            lanes[lane].push(index);
        }

        let apply_lane = |lane: &Vec<usize>| -> Vec<(usize, Result<()>)> {
            lane.iter()
                .map(|&index| (index, self.apply_operation(writer, operations[index])))
                .collect()
        };
        if lanes.len() == 1 {
            return lanes.iter().flat_map(apply_lane).collect();
        }
        let per_lane: Vec<Vec<(usize, Result<()>)>> =
            pool.install(|| lanes.par_iter().map(apply_lane).collect());
        per_lane.into_iter().flatten().collect()
    }

    fn apply_operation(&self, writer: &dyn IndexWriter, operation: &Operation) -> Result<()> {
        match operation {
            Operation::Add {
                entity,
                id,
                document,
            } => writer.add_document(entity, id, document.clone()),
            Operation::Update {
                entity,
                id,
                document,
            } => {
                if self.single_term_deletes {
                    writer.update_document(entity, id, document.clone())
                } else {
                    writer.delete_by_entity_and_id(entity, id)?;
                    writer.add_document(entity, id, document.clone())
                }
            }
            Operation::Delete { entity, id } => {
                if self.single_term_deletes {
                    writer.delete_by_id(id)
                } else {
                    writer.delete_by_entity_and_id(entity, id)
                }
            }
            Operation::PurgeAll { entity } => writer.delete_all_of_type(entity),
            Operation::Optimize => self.resources.workspace().perform_optimization(writer),
            // Committed by the workspace once the batch is through.
            Operation::Flush => Ok(()),
        }
    }
}
