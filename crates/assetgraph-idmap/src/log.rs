//! Append-only allocation log
//!
//! Every fresh allocation is appended as a length-prefixed `bincode` record:
//!
//! ```text
//! [len: u32 LE][IdLogEntry]  [len: u32 LE][IdLogEntry]  ...
//! ```
//!
//! On open the log is replayed front to back. A torn tail (a crash in the
//! middle of an append) is cut off at the last complete record.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::IdMapError;

/// One allocation: `key` was assigned `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdLogEntry {
    pub key: String,
    pub id: u64,
}

pub struct IdLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl IdLog {
    /// Open (or create) the log at `path` and replay every complete entry.
    pub fn open(path: &Path) -> Result<(Self, Vec<IdLogEntry>), IdMapError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (entries, good_len) = replay(&mut file)?;
        let file_len = file.metadata()?.len();
        if good_len < file_len {
            tracing::warn!(
                path = %path.display(),
                kept_bytes = good_len,
                dropped_bytes = file_len - good_len,
                "truncating torn tail of identifier log"
            );
            file.set_len(good_len)?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok((
            Self {
                writer: Mutex::new(BufWriter::new(file)),
                path: path.to_path_buf(),
            },
            entries,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. The write is buffered; call [`IdLog::sync`] to make
    /// it durable.
    pub fn append(&self, entry: &IdLogEntry) -> Result<(), IdMapError> {
        let data = bincode::serialize(entry)?;
        let len = u32::try_from(data.len())
            .map_err(|_| IdMapError::KeyTooLarge(entry.key.len()))?;

        let mut writer = self.writer.lock();
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&data)?;
        Ok(())
    }

    /// Flush buffered entries and sync them to disk.
    pub fn sync(&self) -> Result<(), IdMapError> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Replay complete entries from the start of `file`, returning them together
/// with the byte length they occupy.
fn replay(file: &mut File) -> Result<(Vec<IdLogEntry>, u64), IdMapError> {
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let mut entries = Vec::new();
    let mut good_len = 0u64;

    loop {
        let mut len_bytes = [0u8; 4];
        match file.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        // A corrupt prefix may claim more bytes than the file holds.
        if len as u64 > file_len.saturating_sub(good_len + 4) {
            break;
        }
        let mut data = vec![0u8; len];
        match file.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        match bincode::deserialize::<IdLogEntry>(&data) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        good_len += 4 + len as u64;
    }

    Ok((entries, good_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_replay_returns_appended_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.log");
        {
            let (log, entries) = IdLog::open(&path).unwrap();
            assert!(entries.is_empty());
            log.append(&IdLogEntry { key: "a".into(), id: 1 }).unwrap();
            log.append(&IdLogEntry { key: "b".into(), id: 2 }).unwrap();
            log.sync().unwrap();
        }

        let (_log, entries) = IdLog::open(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                IdLogEntry { key: "a".into(), id: 1 },
                IdLogEntry { key: "b".into(), id: 2 },
            ]
        );
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.log");
        {
            let (log, _) = IdLog::open(&path).unwrap();
            log.append(&IdLogEntry { key: "kept".into(), id: 7 }).unwrap();
            log.sync().unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();

        // Half-written record: a length prefix promising more bytes than follow.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&64u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }

        let (_log, entries) = IdLog::open(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "kept");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
    }

    #[test]
    fn test_oversized_length_prefix_is_a_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.log");
        {
            let (log, _) = IdLog::open(&path).unwrap();
            log.append(&IdLogEntry { key: "first".into(), id: 1 }).unwrap();
            log.append(&IdLogEntry { key: "second".into(), id: 2 }).unwrap();
            log.sync().unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        }

        let (_log, entries) = IdLog::open(&path).unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["first", "second"]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
    }
}
