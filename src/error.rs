use std::path::PathBuf;

use thiserror::Error;

/// Failures of the persistence primitives.
///
/// The upsert engine treats every variant the same way: the offending record
/// is logged at ERROR and the batch moves on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("entry {0} already exists")]
    DuplicateKey(i64),

    #[error("entry {0} not found")]
    NotFound(i64),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Failures of a single batch-loader run. Each variant is terminal to that
/// run only: logged once at ERROR, never raised to the scheduler.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Data file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Failed to read file: {path}, Error: {source}")]
    SourceRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse data from file: {path}, Error: {source}")]
    SourceDecode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_names_the_key() {
        let err = StoreError::DuplicateKey(42);
        assert!(err.to_string().contains("42"));

        let err = StoreError::NotFound(7);
        assert!(err.to_string().contains("7"));
    }

    #[test]
    fn load_error_display_names_the_path() {
        let err = LoadError::SourceNotFound(PathBuf::from("/tmp/feed.json"));
        assert!(err.to_string().contains("/tmp/feed.json"));

        let bad_json = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = LoadError::SourceDecode {
            path: PathBuf::from("feed.json"),
            source: bad_json,
        };
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn io_errors_convert_into_store_errors() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StoreError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }
}
