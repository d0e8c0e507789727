use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

/// Severity tags recognized by the sink. Each level owns one append-only file
/// under the logs root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            LogLevel::Info => "info.log",
            LogLevel::Warn => "warn.log",
            LogLevel::Error => "error.log",
            LogLevel::Success => "success.log",
        }
    }

    /// Case-insensitive parse of a level token.
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "SUCCESS" => Some(LogLevel::Success),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended event. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Parses the on-disk line format `<RFC-3339> [<LEVEL>] - <message>`.
    ///
    /// The level comes from the bracketed tag at its fixed position, never
    /// from substring search over the whole line, so a message that mentions
    /// another level's name cannot change how the entry is classified.
    pub fn parse(line: &str) -> Option<LogEntry> {
        let (timestamp, rest) = line.split_once(" [")?;
        let (level_token, message) = rest.split_once("] - ")?;
        let level = LogLevel::parse(level_token)?;
        Some(LogEntry {
            timestamp: timestamp.to_string(),
            level,
            message: message.to_string(),
        })
    }

    pub fn render(&self) -> String {
        format!("{} [{}] - {}", self.timestamp, self.level, self.message)
    }
}

/// Append-only, level-partitioned event store.
///
/// Writes are durable (one file per level under `root`) and mirrored to
/// stdout. A handle is injected into every component that needs to log;
/// nothing in the crate reaches for ambient global state.
pub struct LogSink {
    root: PathBuf,
    files: Mutex<HashMap<&'static str, File>>,
}

impl LogSink {
    /// Opens the sink, creating the logs directory if absent. This is the
    /// only sink operation allowed to fail; everything after startup is
    /// best-effort.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Appends a timestamped entry to the level's file and mirrors it to
    /// stdout. Never panics and never surfaces an error to the caller; a
    /// failed write is reported on stderr and dropped.
    pub fn append(&self, level: LogLevel, message: impl AsRef<str>) {
        let line = format!("{} [{}] - {}", now_rfc3339(), level, message.as_ref());
        println!("{}", line);
        if let Err(e) = self.write_line(level.file_name(), &line) {
            eprintln!("log sink: dropped {} entry: {}", level, e);
        }
    }

    /// Returns the entries appended at `level`, in append order. A level with
    /// no entries yet is an empty result, not an error.
    pub fn query(&self, level: LogLevel) -> io::Result<Vec<LogEntry>> {
        let path = self.root.join(level.file_name());
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(text
            .lines()
            .filter_map(LogEntry::parse)
            .filter(|entry| entry.level == level)
            .collect())
    }

    /// Combined access-style stream for inbound HTTP interactions.
    pub fn append_access(&self, line: &str) {
        if let Err(e) = self.write_line("access.log", line) {
            eprintln!("log sink: dropped access entry: {}", e);
        }
    }

    // Holds the lock for the whole write so concurrent appends land as whole
    // lines, never interleaved within one entry.
    fn write_line(&self, file_name: &'static str, line: &str) -> io::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "sink lock poisoned"))?;

        let file = match files.entry(file_name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let f = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(self.root.join(file_name))?;
                entry.insert(f)
            }
        };

        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_creates_level_files_lazily() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(dir.path().join("logs")).unwrap();

        sink.append(LogLevel::Info, "hello");

        assert!(dir.path().join("logs/info.log").exists());
        assert!(!dir.path().join("logs/error.log").exists());
    }

    #[test]
    fn query_returns_entries_in_append_order() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(dir.path()).unwrap();

        sink.append(LogLevel::Error, "first");
        sink.append(LogLevel::Info, "interleaved");
        sink.append(LogLevel::Error, "second");

        let entries = sink.query(LogLevel::Error).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
    }

    #[test]
    fn query_of_untouched_level_is_empty_not_an_error() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(dir.path()).unwrap();

        let entries = sink.query(LogLevel::Success).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn level_match_ignores_level_names_inside_messages() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(dir.path()).unwrap();

        sink.append(LogLevel::Info, "upstream returned the word ERROR in a body");
        sink.append(LogLevel::Error, "a real failure");

        let errors = sink.query(LogLevel::Error).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "a real failure");

        let infos = sink.query(LogLevel::Info).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].level, LogLevel::Info);
    }

    #[test]
    fn entry_line_format_round_trips() {
        let entry = LogEntry::parse("2024-01-02T03:04:05.678Z [SUCCESS] - New entry added").unwrap();
        assert_eq!(entry.level, LogLevel::Success);
        assert_eq!(entry.timestamp, "2024-01-02T03:04:05.678Z");
        assert_eq!(entry.message, "New entry added");
        assert_eq!(
            entry.render(),
            "2024-01-02T03:04:05.678Z [SUCCESS] - New entry added"
        );
    }

    #[test]
    fn level_tokens_parse_case_insensitively() {
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("Warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("DEBUG"), None);
    }
}
