use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::engine::UpsertEngine;
use crate::error::LoadError;
use crate::model::Record;
use crate::sink::{LogLevel, LogSink};

pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Reads the batch source, decodes it, and hands the records to the upsert
/// engine. Every step failure is terminal to that run only: logged once at
/// ERROR, never raised to the scheduler.
pub struct BatchLoader {
    source: PathBuf,
    chunk_size: usize,
    engine: UpsertEngine,
    sink: Arc<LogSink>,
    // Overlap guard: a trigger firing while a run is still in progress is
    // skipped with a WARN instead of racing the same store.
    run_guard: Mutex<()>,
}

impl BatchLoader {
    pub fn new(source: PathBuf, engine: UpsertEngine, sink: Arc<LogSink>) -> Self {
        Self {
            source,
            chunk_size: DEFAULT_CHUNK_SIZE,
            engine,
            sink,
            run_guard: Mutex::new(()),
        }
    }

    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self { chunk_size, ..self }
    }

    pub async fn load_and_reconcile(&self) {
        let _running = match self.run_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.sink.append(
                    LogLevel::Warn,
                    "Previous batch run still in progress, skipping this trigger",
                );
                return;
            }
        };

        let records = match self.read_batch() {
            Ok(records) => records,
            Err(e) => {
                self.sink.append(LogLevel::Error, e.to_string());
                return;
            }
        };

        self.engine.reconcile_batch(records, self.chunk_size).await;
    }

    /// Existence check, raw read, JSON decode. Each successful step leaves an
    /// INFO trace; there is no partial-decode recovery.
    fn read_batch(&self) -> Result<Vec<Record>, LoadError> {
        if !self.source.exists() {
            return Err(LoadError::SourceNotFound(self.source.clone()));
        }

        let raw = std::fs::read_to_string(&self.source).map_err(|source| LoadError::SourceRead {
            path: self.source.clone(),
            source,
        })?;
        self.sink.append(
            LogLevel::Info,
            format!("Read data from file: {}", self.source.display()),
        );

        let records: Vec<Record> =
            serde_json::from_str(&raw).map_err(|source| LoadError::SourceDecode {
                path: self.source.clone(),
                source,
            })?;
        self.sink.append(
            LogLevel::Info,
            format!(
                "Parsed {} records from file: {}",
                records.len(),
                self.source.display()
            ),
        );

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SegmentStore;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, source_name: &str) -> (Arc<SegmentStore>, Arc<LogSink>, BatchLoader) {
        let store = Arc::new(SegmentStore::open(&dir.path().join("entries.dat")).unwrap());
        let sink = Arc::new(LogSink::open(dir.path().join("logs")).unwrap());
        let engine = UpsertEngine::new(store.clone(), sink.clone());
        let loader = BatchLoader::new(dir.path().join(source_name), engine, sink.clone());
        (store, sink, loader)
    }

    #[tokio::test]
    async fn loads_decodes_and_reconciles() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("feed.json"),
            r#"[{"id":1,"name":"A","score":10},{"id":2,"name":"B","score":20}]"#,
        )
        .unwrap();
        let (store, sink, loader) = fixture(&dir, "feed.json");

        loader.load_and_reconcile().await;

        assert_eq!(store.entry_count(), 2);
        let infos = sink.query(LogLevel::Info).unwrap();
        assert!(infos.iter().any(|e| e.message.starts_with("Read data from file")));
        assert!(infos.iter().any(|e| e.message.starts_with("Parsed 2 records")));
        assert!(sink.query(LogLevel::Error).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_source_logs_one_error_and_stops() {
        let dir = TempDir::new().unwrap();
        let (store, sink, loader) = fixture(&dir, "absent.json");

        loader.load_and_reconcile().await;

        let errors = sink.query(LogLevel::Error).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Data file not found"));
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn malformed_source_logs_one_error_and_touches_no_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("feed.json"), "this is not json").unwrap();
        let (store, sink, loader) = fixture(&dir, "feed.json");

        loader.load_and_reconcile().await;

        let errors = sink.query(LogLevel::Error).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Failed to parse data from file"));
        assert_eq!(store.entry_count(), 0);
        assert!(sink.query(LogLevel::Success).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_array_is_a_quiet_run() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("feed.json"), "[]").unwrap();
        let (store, sink, loader) = fixture(&dir, "feed.json");

        loader.load_and_reconcile().await;

        assert_eq!(store.entry_count(), 0);
        let infos = sink.query(LogLevel::Info).unwrap();
        assert!(!infos.iter().any(|e| e.message.starts_with("Processing chunk")));
        assert!(sink.query(LogLevel::Error).unwrap().is_empty());
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped_with_a_warning() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("feed.json"), r#"[{"id":1,"name":"A"}]"#).unwrap();
        let (store, sink, loader) = fixture(&dir, "feed.json");

        // Simulate a run still in progress by holding the guard.
        let _running = loader.run_guard.try_lock().unwrap();
        loader.load_and_reconcile().await;

        let warns = sink.query(LogLevel::Warn).unwrap();
        assert_eq!(warns.len(), 1);
        assert!(warns[0].message.contains("skipping"));
        assert_eq!(store.entry_count(), 0);
    }
}
