mod common;

use std::thread;

use sluice::index::memory::MemoryDirectory;
use sluice::{Document, IndexConfig, Operation, OwnershipMode, SluiceError, WorkspaceKind};

use common::{RecordingHandler, backend};

fn nrt_config() -> IndexConfig {
    IndexConfig::builder()
        .index_name("books")
        .near_real_time(true)
        .build()
        .unwrap()
}

fn book(id: &str) -> Operation {
    Operation::add("Book", id, Document::new().add_text("title", id))
}

#[test]
fn test_reads_see_uncommitted_writes() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let backend = backend(nrt_config(), &dir, RecordingHandler::shared(), &["Book"]);
    assert_eq!(backend.workspace().kind(), WorkspaceKind::NearRealTime);

    backend.apply_work(vec![book("1")], None)?;
    let reader = backend.open_reader()?;
    assert!(reader.contains("Book", "1"));
    assert_eq!(dir.committed_len(), 0, "Reads never force a commit");
    backend.close_reader(reader);

    backend.apply_work(vec![Operation::delete("Book", "1")], None)?;
    let reader = backend.open_reader()?;
    assert!(!reader.contains("Book", "1"), "Deletes are visible too");
    backend.close_reader(reader);

    backend.flush()?;
    assert_eq!(dir.commit_count(), 1);
    Ok(())
}

#[test]
fn test_overlapping_refreshes_while_writing() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let backend = backend(nrt_config(), &dir, RecordingHandler::shared(), &["Book"]);

    backend.apply_work(vec![book("1")], None)?;
    let stale = backend.open_reader()?;
    let first_generation = stale.generation();

    backend.apply_work(vec![book("2")], None)?;

    thread::scope(|s| {
        // A write in flight while two readers refresh.
        s.spawn(|| backend.apply_work(vec![book("3")], None).unwrap());
        let readers: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    let reader = backend.open_reader().unwrap();
                    assert!(reader.generation() > first_generation);
                    assert!(reader.contains("Book", "2"));
                    backend.close_reader(reader);
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }
    });

    // The cache released the stale reader exactly once.
    assert_eq!(stale.shared().ref_count(), 1);
    drop(stale);

    let reader = backend.open_reader()?;
    assert!(reader.contains("Book", "3"));
    drop(reader);

    backend.shutdown();
    assert_eq!(dir.open_readers(), 0, "Every reader is closed after shutdown");
    Ok(())
}

#[test]
fn test_readers_require_nrt() -> sluice::Result<()> {
    let dir = MemoryDirectory::new("books");
    let backend = backend(
        IndexConfig::default(),
        &dir,
        RecordingHandler::shared(),
        &["Book"],
    );
    assert!(matches!(
        backend.open_reader(),
        Err(SluiceError::Unsupported(_))
    ));

    let invalid = IndexConfig::builder()
        .near_real_time(true)
        .ownership(OwnershipMode::Shared)
        .build();
    assert!(matches!(invalid, Err(SluiceError::InvalidConfig(_))));
    Ok(())
}
