//! In-flight fetch registry.
//!
//! ```text
//! attach(id) ──► vacant   ──► Leader   (caller must start or complete the fetch)
//!            └─► occupied ──► Follower (caller waits on the existing fetch)
//!
//! complete(id, result): remove entry, then broadcast result to every receiver
//! ```
//!
//! Subscribing happens under the map's entry lock and completion removes the
//! entry before sending, so a receiver is either subscribed in time to see
//! the result or finds no entry and becomes a new leader. New leaders re-check
//! the local store, and packs are adopted before completion is sent.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::error::{FetchError, FetchResult};
use crate::object::ObjectId;

type Completion = FetchResult<()>;

/// Outcome of [`InFlightTable::attach`].
pub enum Attach {
    Leader(broadcast::Receiver<Completion>),
    Follower(broadcast::Receiver<Completion>),
}

#[derive(Default)]
pub struct InFlightTable {
    pending: DashMap<ObjectId, broadcast::Sender<Completion>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, id: ObjectId) -> Attach {
        match self.pending.entry(id) {
            Entry::Occupied(entry) => Attach::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(1);
                entry.insert(tx);
                Attach::Leader(rx)
            }
        }
    }

    /// Resolves every caller waiting on `id`.
    pub fn complete(&self, id: &ObjectId, result: Completion) {
        if let Some((_, tx)) = self.pending.remove(id) {
            // No receivers left is fine: every caller gave up.
            let _ = tx.send(result);
        }
    }

    /// Fails every pending fetch.
    pub fn fail_all(&self, error: FetchError) {
        let ids: Vec<ObjectId> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.complete(&id, Err(error.clone()));
        }
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Waits for the completion broadcast.
pub async fn wait(mut rx: broadcast::Receiver<Completion>) -> Completion {
    match rx.recv().await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Cancelled),
    }
}
