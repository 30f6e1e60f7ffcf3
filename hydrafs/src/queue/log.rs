//! Durable task log with a checkpoint marker.
//!
//! ```text
//! tasks.log          [seq 7][seq 8][seq 9][seq 10]   journal, append order
//! tasks.checkpoint   8                               last applied seq
//! ```
//!
//! Records at or below the checkpoint are skipped on open. Once every logged
//! record is checkpointed the journal is truncated; a crash between the
//! checkpoint write and the truncation only leaves records that are skipped.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::task::FileSystemTask;
use crate::store::{Journal, StoreError, StoreResult};

pub const LOG_FILE_NAME: &str = "tasks.log";
pub const CHECKPOINT_FILE_NAME: &str = "tasks.checkpoint";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedTask {
    pub seq: u64,
    pub task: FileSystemTask,
}

pub struct TaskLog {
    journal: Journal<LoggedTask>,
    checkpoint_path: PathBuf,
    checkpoint: u64,
    next_seq: u64,
    pending: VecDeque<LoggedTask>,
}

impl TaskLog {
    pub fn open(dir: &Path, sync: bool) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let checkpoint_path = dir.join(CHECKPOINT_FILE_NAME);
        let checkpoint = read_checkpoint(&checkpoint_path)?;

        let (journal, records) = Journal::open(&dir.join(LOG_FILE_NAME), sync)?;
        let logged = records.len();
        let last_seq = records.last().map(|r: &LoggedTask| r.seq).unwrap_or(0);
        let pending: VecDeque<LoggedTask> =
            records.into_iter().filter(|r| r.seq > checkpoint).collect();

        if !pending.is_empty() {
            info!(
                pending = pending.len(),
                skipped = logged - pending.len(),
                checkpoint,
                "Replaying background tasks"
            );
        }

        Ok(Self {
            journal,
            checkpoint_path,
            checkpoint,
            next_seq: last_seq.max(checkpoint) + 1,
            pending,
        })
    }

    /// Appends `task` durably and returns its sequence number.
    pub fn append(&mut self, task: FileSystemTask) -> StoreResult<u64> {
        let record = LoggedTask {
            seq: self.next_seq,
            task,
        };
        self.journal.append(&record)?;
        self.next_seq += 1;
        let seq = record.seq;
        self.pending.push_back(record);
        Ok(seq)
    }

    /// The oldest `max` unapplied tasks.
    pub fn peek_batch(&self, max: usize) -> Vec<LoggedTask> {
        self.pending.iter().take(max).cloned().collect()
    }

    /// Marks everything up to and including `seq` as applied.
    pub fn checkpoint(&mut self, seq: u64) -> StoreResult<()> {
        write_checkpoint(&self.checkpoint_path, seq)?;
        self.checkpoint = seq;
        while self.pending.front().is_some_and(|r| r.seq <= seq) {
            self.pending.pop_front();
        }
        if self.pending.is_empty() && self.journal.record_count() > 0 {
            self.journal.truncate()?;
            debug!(checkpoint = seq, "Task log truncated");
        }
        Ok(())
    }

    pub fn last_checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn read_checkpoint(path: &Path) -> StoreResult<u64> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bincode::deserialize(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(StoreError::Io(e)),
    }
}

fn write_checkpoint(path: &Path, seq: u64) -> StoreResult<()> {
    let temp = path.with_extension("checkpoint.tmp");
    let bytes = bincode::serialize(&seq)?;
    {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp, path)?;
    Ok(())
}
