use std::sync::Arc;

use tempfile::TempDir;

use intake::engine::UpsertEngine;
use intake::loader::BatchLoader;
use intake::sink::{LogLevel, LogSink};
use intake::store::{EntryStore, SegmentStore};

fn pipeline(dir: &TempDir) -> (Arc<SegmentStore>, Arc<LogSink>, BatchLoader) {
    let store = Arc::new(SegmentStore::open(&dir.path().join("entries.dat")).unwrap());
    let sink = Arc::new(LogSink::open(dir.path().join("logs")).unwrap());
    let engine = UpsertEngine::new(store.clone(), sink.clone());
    let loader = BatchLoader::new(dir.path().join("feed.json"), engine, sink.clone());
    (store, sink, loader)
}

#[tokio::test]
async fn create_then_update_of_the_same_id_in_one_chunk() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("feed.json"),
        r#"[{"id":1,"name":"A","score":10},{"id":1,"name":"A2","score":20}]"#,
    )
    .unwrap();
    let (store, sink, loader) = pipeline(&dir);

    loader.load_and_reconcile().await;

    let current = store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(current.record.name, "A2");
    assert_eq!(current.record.score, Some(20.0));

    let successes = sink.query(LogLevel::Success).unwrap();
    assert_eq!(successes.len(), 2);
    assert!(successes[0].message.starts_with("New entry added"));
    assert!(successes[1].message.starts_with("Existing entry updated"));
}

#[tokio::test]
async fn rerunning_the_same_feed_updates_instead_of_duplicating() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("feed.json"),
        r#"[{"id":1,"name":"A"},{"id":2,"name":"B"},{"id":3,"name":"C"}]"#,
    )
    .unwrap();
    let (store, sink, loader) = pipeline(&dir);

    loader.load_and_reconcile().await;
    loader.load_and_reconcile().await;

    assert_eq!(store.entry_count(), 3);
    assert!(sink.query(LogLevel::Error).unwrap().is_empty());

    let successes = sink.query(LogLevel::Success).unwrap();
    assert_eq!(successes.len(), 6);
    let updates = successes
        .iter()
        .filter(|e| e.message.starts_with("Existing entry updated"))
        .count();
    assert_eq!(updates, 3);
}

#[tokio::test]
async fn upsert_identity_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("feed.json"),
        r#"[{"id":1,"name":"A","city":"Pune"},{"id":2,"name":"B"}]"#,
    )
    .unwrap();

    {
        let (_, _, loader) = pipeline(&dir);
        loader.load_and_reconcile().await;
    }

    // Fresh components over the same segment file, as after a process restart.
    let (store, sink, loader) = pipeline(&dir);
    loader.load_and_reconcile().await;

    assert_eq!(store.entry_count(), 2);
    let successes = sink.query(LogLevel::Success).unwrap();
    let second_run = &successes[successes.len() - 2..];
    assert!(second_run
        .iter()
        .all(|e| e.message.starts_with("Existing entry updated")));
}

#[tokio::test]
async fn failures_are_only_observable_through_the_logs() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("feed.json"), "{ not an array").unwrap();
    let (store, sink, loader) = pipeline(&dir);

    // The loader itself surfaces nothing; operators read the error log.
    loader.load_and_reconcile().await;

    assert_eq!(store.entry_count(), 0);
    assert_eq!(sink.query(LogLevel::Error).unwrap().len(), 1);
}
