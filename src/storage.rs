use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::model::StoredRecord;

/// Append-only segment file holding record versions.
///
/// Write format: `[Length (4b LE)][rkyv payload (N bytes)]` repeated. Updates
/// append a fresh version; nothing is rewritten in place, so the file doubles
/// as the store's history.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    file: File,
    write_offset: u64,
}

impl Segment {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let write_offset = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            write_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one version and returns the offset it landed at.
    pub fn append(&mut self, version: &StoredRecord) -> Result<u64, StoreError> {
        let bytes = rkyv::to_bytes::<_, 1024>(version).map_err(|e| StoreError::Codec(e.to_string()))?;

        let start = self.write_offset;
        let len = bytes.len() as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&bytes)?;

        self.write_offset += 4 + bytes.len() as u64;
        Ok(start)
    }

    pub fn read(&self, offset: u64) -> Result<StoredRecord, StoreError> {
        // Clone the handle so reads never move the writer's cursor.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let (_, version) = read_framed(&mut file)?;
        Ok(version)
    }

    /// Walks the whole segment from the start, yielding every version with
    /// its offset. Used to rebuild the in-memory index on open, which is what
    /// makes upsert identity survive a process restart.
    pub fn scan(&self) -> Result<Vec<(u64, StoredRecord)>, StoreError> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;

        let mut versions = Vec::new();
        let mut offset = 0u64;
        while offset < self.write_offset {
            let (frame_len, version) = read_framed(&mut file)?;
            versions.push((offset, version));
            offset += frame_len;
        }
        Ok(versions)
    }
}

fn read_framed(file: &mut File) -> Result<(u64, StoredRecord), StoreError> {
    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut bytes = vec![0u8; len];
    file.read_exact(&mut bytes)?;

    // Validated deserialization: a torn or corrupt frame surfaces as a codec
    // error instead of undefined behavior.
    let version = rkyv::from_bytes::<StoredRecord>(&bytes).map_err(|e| StoreError::Codec(e.to_string()))?;

    Ok((4 + len as u64, version))
}
