mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use sluice::index::memory::MemoryDirectory;
use sluice::{Document, ExecutionMode, IndexConfig, Operation};

use common::{RecordingHandler, backend, ids};

fn book(id: impl Into<String>) -> Operation {
    Operation::add("Book", id, Document::new())
}

/// Every submitted id is either committed or named by some report.
fn assert_nothing_lost(dir: &MemoryDirectory, handler: &RecordingHandler, submitted: &[String]) {
    let committed: BTreeSet<String> = ids(dir).into_iter().collect();
    let reported: BTreeSet<String> = handler
        .reports()
        .into_iter()
        .flatten()
        .filter_map(|op| op.id().map(str::to_string))
        .collect();
    for id in submitted {
        assert!(
            committed.contains(id) || reported.contains(id),
            "Operation for '{id}' was silently lost"
        );
    }
}

#[test]
fn test_failed_operation_rolls_back_the_batch() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let handler = RecordingHandler::shared();
    let backend = backend(IndexConfig::default(), &dir, handler.clone(), &["Book"]);

    // 1. One document-level failure in a three-operation batch
    dir.fail_next_apply();
    backend.apply_work(vec![book("1"), book("2"), book("3")], None)?;

    let reports = handler.reports();
    assert_eq!(reports.len(), 1, "Exactly one report per failed batch");
    assert_eq!(reports[0].len(), 3, "The report lists the whole batch");
    assert_eq!(handler.failed().len(), 1);
    assert_eq!(dir.committed_len(), 0, "A failed batch is not committed");
    assert!(!dir.is_locked(), "The lock is released after a failure");

    // 2. The next batch opens a fresh writer
    backend.apply_work(vec![book("4")], None)?;
    assert_eq!(ids(&dir), vec!["4"]);

    let stats = backend.stats();
    assert_eq!(stats.operations_failed, 1);
    Ok(())
}

#[test]
fn test_open_failure_reports_the_batch() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let handler = RecordingHandler::shared();
    let backend = backend(IndexConfig::default(), &dir, handler.clone(), &["Book"]);

    dir.fail_next_open();
    backend.apply_work(vec![book("1"), book("2")], None)?;
    assert_eq!(handler.reports(), vec![vec![book("1"), book("2")]]);
    assert_eq!(dir.committed_len(), 0);

    backend.apply_work(vec![book("3")], None)?;
    assert_eq!(ids(&dir), vec!["3"]);
    Ok(())
}

#[test]
fn test_commit_failure_keeps_pending_work() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let handler = RecordingHandler::shared();
    let backend = backend(IndexConfig::default(), &dir, handler.clone(), &["Book"]);

    dir.fail_next_commit();
    backend.apply_work(vec![book("1")], None)?;
    assert_eq!(handler.exceptions().len(), 1);
    assert_eq!(dir.committed_len(), 0);

    // The writer stays open, so the next commit carries both documents.
    backend.apply_work(vec![book("2")], None)?;
    assert_eq!(ids(&dir), vec!["1", "2"]);
    Ok(())
}

#[test]
fn test_close_failure_releases_the_lock() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let handler = RecordingHandler::shared();
    let backend = backend(IndexConfig::default(), &dir, handler.clone(), &["Book"]);

    backend.apply_work(vec![book("1")], None)?;
    dir.fail_next_close();
    backend.shutdown();

    assert!(!dir.is_locked());
    assert_eq!(handler.exceptions().len(), 1);
    assert_eq!(ids(&dir), vec!["1"]);
    Ok(())
}

/// Thirty batches with periodic apply and open faults.
fn run_with_random_faults(config: IndexConfig) -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let handler = RecordingHandler::shared();
    let backend = backend(config, &dir, handler.clone(), &["Book"]);

    let mut submitted = Vec::new();
    for batch in 0..30 {
        match batch % 7 {
            2 => dir.fail_next_apply(),
            4 => dir.fail_next_open(),
            _ => {}
        }
        let operations: Vec<Operation> = (0..4)
            .map(|i| {
                let id = format!("{batch}-{i}");
                submitted.push(id.clone());
                book(id)
            })
            .collect();
        backend.apply_work(operations, None)?;
    }
    backend.flush()?;

    assert_nothing_lost(&dir, &handler, &submitted);
    assert!(!handler.reports().is_empty());
    backend.shutdown();
    Ok(())
}

#[test]
fn test_random_faults_lose_nothing() -> sluice::Result<()> {
    run_with_random_faults(IndexConfig::builder().worker_threads(3).build()?)
}

#[test]
fn test_random_faults_lose_nothing_near_real_time() -> sluice::Result<()> {
    run_with_random_faults(
        IndexConfig::builder()
            .near_real_time(true)
            .worker_threads(3)
            .build()?,
    )
}

#[test]
fn test_random_faults_lose_nothing_scheduled() -> sluice::Result<()> {
    run_with_random_faults(
        IndexConfig::builder()
            .execution(ExecutionMode::Async)
            .commit_interval(Duration::from_secs(3600))
            .build()?,
    )
}

#[test]
fn test_rollback_reports_earlier_uncommitted_batches() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let handler = RecordingHandler::shared();
    let config = IndexConfig::builder().near_real_time(true).build()?;
    let backend = backend(config, &dir, handler.clone(), &["Book"]);

    // 1. An acknowledged batch that is applied but not committed
    backend.apply_work(vec![book("1")], None)?;
    assert_eq!(dir.committed_len(), 0);
    assert!(handler.reports().is_empty());

    // 2. A later failure rolls the writer back
    dir.fail_next_apply();
    backend.apply_work(vec![book("2")], None)?;
    backend.flush()?;

    let reports = handler.reports();
    assert!(
        reports.iter().any(|report| report.contains(&book("1"))),
        "Discarded work of an earlier batch must be reported"
    );
    assert!(ids(&dir).is_empty());

    // 3. A committed batch is no longer at risk
    backend.apply_work(vec![book("3")], None)?;
    backend.flush()?;
    dir.fail_next_apply();
    backend.apply_work(vec![book("4")], None)?;
    assert!(
        !handler
            .reports()
            .iter()
            .skip(reports.len())
            .any(|report| report.contains(&book("3"))),
        "Committed work is never reported as lost"
    );
    assert_eq!(ids(&dir), vec!["3"]);
    Ok(())
}
