use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::StoreError;
use crate::model::Record;
use crate::sink::{LogLevel, LogSink};
use crate::store::EntryStore;

pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(30);

/// How one record landed in the store.
enum Outcome {
    Created,
    Updated,
}

/// Drives bounded-concurrency reconciliation of a batch against the store.
///
/// The batch is partitioned into contiguous chunks of at most `chunk_size`
/// records. Chunks run strictly in sequence; records within a chunk run
/// concurrently, which caps in-flight store calls at `chunk_size` and gives
/// the store natural backpressure. Every outcome is observable only through
/// the injected log sink.
pub struct UpsertEngine {
    store: Arc<dyn EntryStore>,
    sink: Arc<LogSink>,
    reconcile_timeout: Duration,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn EntryStore>, sink: Arc<LogSink>) -> Self {
        Self {
            store,
            sink,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }

    /// Caps how long a single record's find/create/update round trip may
    /// take. Expiry counts as that record's failure, not the chunk's.
    pub fn with_reconcile_timeout(self, reconcile_timeout: Duration) -> Self {
        Self {
            reconcile_timeout,
            ..self
        }
    }

    pub async fn reconcile_batch(&self, records: Vec<Record>, chunk_size: usize) {
        if records.is_empty() {
            return;
        }
        let chunk_size = chunk_size.max(1);
        let total_chunks = (records.len() + chunk_size - 1) / chunk_size;

        let mut chunks: Vec<Vec<Record>> = Vec::with_capacity(total_chunks);
        let mut current = Vec::with_capacity(chunk_size);
        for record in records {
            current.push(record);
            if current.len() == chunk_size {
                chunks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        for (i, chunk) in chunks.into_iter().enumerate() {
            self.sink.append(
                LogLevel::Info,
                format!("Processing chunk: {} / {}", i + 1, total_chunks),
            );
            self.reconcile_chunk(chunk).await;
        }
    }

    /// Chunk i+1 does not start until every task spawned here has finished,
    /// successfully or not.
    async fn reconcile_chunk(&self, chunk: Vec<Record>) {
        let mut handles = Vec::with_capacity(chunk.len());
        for lane in split_into_lanes(chunk) {
            let store = self.store.clone();
            let sink = self.sink.clone();
            let deadline = self.reconcile_timeout;
            handles.push(tokio::spawn(async move {
                for record in lane {
                    reconcile_one(store.as_ref(), &sink, record, deadline).await;
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                self.sink
                    .append(LogLevel::Error, format!("Reconcile task failed: {}", e));
            }
        }
    }
}

/// Groups a chunk into lanes: one lane per distinct id, input order kept
/// within a lane. Lanes run concurrently, so two records sharing an id are
/// applied in sequence (create observed before the update) while unrelated
/// ids still overlap.
fn split_into_lanes(chunk: Vec<Record>) -> Vec<Vec<Record>> {
    let mut lanes: Vec<Vec<Record>> = Vec::with_capacity(chunk.len());
    let mut by_id: HashMap<i64, usize> = HashMap::new();
    for record in chunk {
        match by_id.get(&record.id) {
            Some(&lane) => lanes[lane].push(record),
            None => {
                by_id.insert(record.id, lanes.len());
                lanes.push(vec![record]);
            }
        }
    }
    lanes
}

/// Per-record reconcile: failures are logged and swallowed here so a single
/// bad record never takes down its chunk.
async fn reconcile_one(store: &dyn EntryStore, sink: &LogSink, record: Record, deadline: Duration) {
    let rendered = record.to_log_json();
    match timeout(deadline, apply(store, &record)).await {
        Ok(Ok(Outcome::Created)) => {
            sink.append(LogLevel::Success, format!("New entry added: {}", rendered));
        }
        Ok(Ok(Outcome::Updated)) => {
            sink.append(
                LogLevel::Success,
                format!("Existing entry updated: {}", rendered),
            );
        }
        Ok(Err(e)) => {
            sink.append(
                LogLevel::Error,
                format!("Error processing entry: {}, Error: {}", rendered, e),
            );
        }
        Err(_) => {
            sink.append(
                LogLevel::Error,
                format!(
                    "Error processing entry: {}, Error: reconcile timed out after {:?}",
                    rendered, deadline
                ),
            );
        }
    }
}

async fn apply(store: &dyn EntryStore, record: &Record) -> Result<Outcome, StoreError> {
    match store.find_by_id(record.id).await? {
        None => {
            store.create(record).await?;
            Ok(Outcome::Created)
        }
        Some(_) => {
            store.update(record.id, record).await?;
            Ok(Outcome::Updated)
        }
    }
}
