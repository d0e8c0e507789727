use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::model::{Record, StoredRecord};
use crate::storage::Segment;

/// The persistence primitives the upsert engine needs, and nothing more.
///
/// Implementations enforce key uniqueness (`create` on an existing id fails,
/// `update` on a missing id fails) but provide no batch primitive and no
/// cross-process locking: a reconcile is always a find followed by a
/// conditional create-or-update.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<StoredRecord>, StoreError>;

    /// Persists a new entry. Fails with [`StoreError::DuplicateKey`] if the
    /// id is already present.
    async fn create(&self, record: &Record) -> Result<StoredRecord, StoreError>;

    /// Full-field replacement of an existing entry. `created_at` is carried
    /// over from the first version, `updated_at` is refreshed. Fails with
    /// [`StoreError::NotFound`] if the id is absent.
    async fn update(&self, id: i64, record: &Record) -> Result<StoredRecord, StoreError>;
}

/// File-backed [`EntryStore`]: an append-only segment plus an in-memory
/// `id -> version offsets` index. The last offset of an id is its current
/// version; older offsets are history.
pub struct SegmentStore {
    segment: Mutex<Segment>,
    index: RwLock<HashMap<i64, Vec<u64>>>,
}

impl SegmentStore {
    /// Opens the store and rebuilds the index by scanning the segment, so
    /// entries persisted by earlier runs keep their identity.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let segment = Segment::open(path)?;

        let mut index: HashMap<i64, Vec<u64>> = HashMap::new();
        for (offset, version) in segment.scan()? {
            index.entry(version.record.id).or_default().push(offset);
        }

        Ok(Self {
            segment: Mutex::new(segment),
            index: RwLock::new(index),
        })
    }

    /// Number of distinct ids currently persisted.
    pub fn entry_count(&self) -> usize {
        self.index.read().map(|idx| idx.len()).unwrap_or(0)
    }

    fn read_version(&self, offset: u64) -> Result<StoredRecord, StoreError> {
        let segment = self.segment.lock().map_err(|_| StoreError::Poisoned)?;
        segment.read(offset)
    }

    fn append_version(&self, version: &StoredRecord) -> Result<u64, StoreError> {
        let mut segment = self.segment.lock().map_err(|_| StoreError::Poisoned)?;
        segment.append(version)
    }
}

#[async_trait]
impl EntryStore for SegmentStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<StoredRecord>, StoreError> {
        let offset = {
            let index = self.index.read().map_err(|_| StoreError::Poisoned)?;
            match index.get(&id).and_then(|offsets| offsets.last()) {
                Some(&offset) => offset,
                None => return Ok(None),
            }
        };
        Ok(Some(self.read_version(offset)?))
    }

    async fn create(&self, record: &Record) -> Result<StoredRecord, StoreError> {
        let version = StoredRecord::new(record.clone(), Utc::now().timestamp_millis());

        // The write lock spans the uniqueness check and the append, so two
        // concurrent creates for the same id cannot both pass the check.
        let mut index = self.index.write().map_err(|_| StoreError::Poisoned)?;
        if index.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey(record.id));
        }

        let offset = self.append_version(&version)?;
        index.entry(record.id).or_default().push(offset);
        Ok(version)
    }

    async fn update(&self, id: i64, record: &Record) -> Result<StoredRecord, StoreError> {
        let mut index = self.index.write().map_err(|_| StoreError::Poisoned)?;
        let last = *index
            .get(&id)
            .and_then(|offsets| offsets.last())
            .ok_or(StoreError::NotFound(id))?;

        let previous = self.read_version(last)?;
        let version = previous.replaced_with(record.clone(), Utc::now().timestamp_millis());

        let offset = self.append_version(&version)?;
        if let Some(offsets) = index.get_mut(&id) {
            offsets.push(offset);
        }
        Ok(version)
    }
}
