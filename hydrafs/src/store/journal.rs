//! Append-only record journal.
//!
//! Each record is a little-endian `u32` length followed by the bincode body.
//! A crash in the middle of an append leaves a short final record; opening
//! the journal drops that torn tail and truncates the file back to the last
//! complete record.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{StoreError, StoreResult};

/// Upper bound on a single record, guarding against reading garbage lengths.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Durable, ordered log of `R` records.
pub struct Journal<R> {
    path: PathBuf,
    file: File,
    len: u64,
    records: usize,
    sync: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R: Serialize + DeserializeOwned> Journal<R> {
    /// Opens (or creates) the journal and returns every complete record in
    /// append order.
    ///
    /// With `sync` set, every append is followed by `fsync`.
    pub fn open(path: &Path, sync: bool) -> StoreResult<(Self, Vec<R>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let (records, valid_len) = Self::replay(path, &file)?;
        let actual_len = file.metadata()?.len();
        if valid_len < actual_len {
            warn!(
                path = %path.display(),
                dropped_bytes = actual_len - valid_len,
                "Dropping torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let journal = Self {
            path: path.to_path_buf(),
            file,
            len: valid_len,
            records: records.len(),
            sync,
            _record: PhantomData,
        };
        Ok((journal, records))
    }

    fn replay(path: &Path, file: &File) -> StoreResult<(Vec<R>, u64)> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        let mut records = Vec::new();
        let mut offset = 0u64;

        loop {
            let len = match reader.read_u32::<LittleEndian>() {
                Ok(len) => len,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            if len > MAX_RECORD_LEN {
                return Err(StoreError::Corrupt {
                    file: path.display().to_string(),
                    offset,
                });
            }
            let mut body = vec![0u8; len as usize];
            match reader.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let record = bincode::deserialize(&body).map_err(|_| StoreError::Corrupt {
                file: path.display().to_string(),
                offset,
            })?;
            records.push(record);
            offset += 4 + u64::from(len);
        }

        Ok((records, offset))
    }

    /// Appends one record. Returns once the write (and `fsync`, if enabled)
    /// completes.
    pub fn append(&mut self, record: &R) -> StoreResult<()> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Appends several records with a single write and sync.
    pub fn append_all(&mut self, records: &[R]) -> StoreResult<()> {
        let mut buf = Vec::new();
        for record in records {
            let body = bincode::serialize(record)?;
            buf.write_u32::<LittleEndian>(body.len() as u32)?;
            buf.extend_from_slice(&body);
        }
        if let Err(e) = self.write_durable(&buf) {
            if let Err(rollback) = self.discard_uncommitted() {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Failed to roll back partial journal append"
                );
            }
            return Err(e.into());
        }
        self.len += buf.len() as u64;
        self.records += records.len();
        Ok(())
    }

    fn write_durable(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file.write_all(buf)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cuts the file back to the last complete append so a failed write
    /// cannot sit between two good records.
    fn discard_uncommitted(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.len)?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Discards every record.
    pub fn truncate(&mut self) -> StoreResult<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        self.records = 0;
        Ok(())
    }

    /// Bytes currently in the journal.
    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    /// Records appended since open or the last truncation, including replayed ones.
    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Op {
        Put(String, u64),
        Remove(String),
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.journal");
        {
            let (mut journal, replayed) = Journal::<Op>::open(&path, true).unwrap();
            assert!(replayed.is_empty());
            journal.append(&Op::Put("a".into(), 1)).unwrap();
            journal
                .append_all(&[Op::Put("b".into(), 2), Op::Remove("a".into())])
                .unwrap();
            assert_eq!(journal.record_count(), 3);
        }

        let (journal, replayed) = Journal::<Op>::open(&path, true).unwrap();
        assert_eq!(
            replayed,
            vec![
                Op::Put("a".into(), 1),
                Op::Put("b".into(), 2),
                Op::Remove("a".into())
            ]
        );
        assert_eq!(journal.record_count(), 3);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.journal");
        {
            let (mut journal, _) = Journal::<Op>::open(&path, false).unwrap();
            journal.append(&Op::Put("kept".into(), 7)).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();

        // Half of a second record.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[40, 0, 0, 0, 1, 2, 3]).unwrap();
        drop(file);

        let (journal, replayed) = Journal::<Op>::open(&path, false).unwrap();
        assert_eq!(replayed, vec![Op::Put("kept".into(), 7)]);
        assert_eq!(journal.len_bytes(), good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_failed_append_does_not_strand_bytes_between_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.journal");
        let (mut journal, _) = Journal::<Op>::open(&path, false).unwrap();
        journal.append(&Op::Put("first".into(), 1)).unwrap();

        // A write that died after the length prefix and part of the body.
        let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(&[40, 0, 0, 0, 9, 9]).unwrap();
        drop(raw);
        journal.discard_uncommitted().unwrap();

        journal.append(&Op::Put("second".into(), 2)).unwrap();
        drop(journal);

        let (journal, replayed) = Journal::<Op>::open(&path, false).unwrap();
        assert_eq!(
            replayed,
            vec![Op::Put("first".into(), 1), Op::Put("second".into(), 2)]
        );
        assert_eq!(journal.record_count(), 2);
    }

    #[test]
    fn test_truncate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.journal");
        let (mut journal, _) = Journal::<Op>::open(&path, false).unwrap();
        journal.append(&Op::Remove("x".into())).unwrap();
        journal.truncate().unwrap();
        journal.append(&Op::Remove("y".into())).unwrap();
        drop(journal);

        let (_, replayed) = Journal::<Op>::open(&path, false).unwrap();
        assert_eq!(replayed, vec![Op::Remove("y".into())]);
    }

    #[test]
    fn test_garbage_length_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.journal");
        std::fs::write(&path, [0xff, 0xff, 0xff, 0xff, 0]).unwrap();
        assert!(matches!(
            Journal::<Op>::open(&path, false),
            Err(StoreError::Corrupt { offset: 0, .. })
        ));
    }
}
