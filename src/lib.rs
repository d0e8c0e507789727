pub mod engine;
pub mod error;
pub mod loader;
pub mod model;
pub mod schedule;
pub mod server;
pub mod sink;
pub mod storage;
pub mod store;

pub use engine::UpsertEngine;
pub use error::{LoadError, StoreError};
pub use loader::BatchLoader;
pub use model::{Record, StoredRecord};
pub use schedule::Schedule;
pub use sink::{LogEntry, LogLevel, LogSink};
pub use store::{EntryStore, SegmentStore};
