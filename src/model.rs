use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// One entry of the inbound batch feed.
///
/// `id` is the stable identity key; everything else is payload. The mock feed
/// omits fields freely, so every payload field except `name` is optional.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Record {
    /// Unique ID of the entity
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub age: Option<u32>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub gender: Option<String>,
}

impl Record {
    /// JSON rendering for log messages. Falls back to the debug form if the
    /// record somehow cannot be serialized.
    pub fn to_log_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// The persisted form of a [`Record`]: payload plus store-managed timestamps
/// (unix milliseconds).
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct StoredRecord {
    pub record: Record,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredRecord {
    pub fn new(record: Record, now_ms: i64) -> Self {
        Self {
            record,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Full-field replacement. `created_at` survives from the first version.
    pub fn replaced_with(&self, record: Record, now_ms: i64) -> Self {
        Self {
            record,
            created_at: self.created_at,
            updated_at: now_ms,
        }
    }
}
