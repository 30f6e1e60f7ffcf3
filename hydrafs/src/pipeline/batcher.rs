//! Request coalescing.
//!
//! Ids arriving within `batch_window` of the first id of a batch are grouped,
//! up to `batch_size`, into one download.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::object::ObjectId;

/// Runs until the channel closes or `cancel` fires. Each batch is handed to
/// `dispatch`, which must not block.
pub async fn run_batcher<F>(
    mut rx: mpsc::UnboundedReceiver<ObjectId>,
    batch_size: usize,
    batch_window: Duration,
    cancel: CancellationToken,
    mut dispatch: F,
) where
    F: FnMut(Vec<ObjectId>),
{
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            next = rx.recv() => match next {
                Some(id) => id,
                None => return,
            },
        };

        let mut batch = vec![first];
        let deadline = Instant::now() + batch_window;
        let mut closed = false;

        while batch.len() < batch_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(id)) => {
                    if !batch.contains(&id) {
                        batch.push(id);
                    }
                }
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        trace!(batch_len = batch.len(), "Dispatching batch");
        dispatch(batch);
        if closed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use std::sync::{Arc, Mutex};

    fn ids(n: usize) -> Vec<ObjectId> {
        (0..n)
            .map(|i| ObjectId::hash_object(ObjectKind::Blob, i.to_string().as_bytes()))
            .collect()
    }

    #[tokio::test]
    async fn test_groups_up_to_batch_size() {
        let (tx, rx) = mpsc::unbounded_channel();
        for id in ids(5) {
            tx.send(id).unwrap();
        }
        drop(tx);

        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        run_batcher(rx, 2, Duration::from_millis(50), CancellationToken::new(), move |b| {
            sink.lock().unwrap().push(b.len())
        })
        .await;

        assert_eq!(*batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_window_flushes_partial_batch() {
        let (tx, rx) = mpsc::unbounded_channel();
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let handle = tokio::spawn(run_batcher(
            rx,
            64,
            Duration::from_millis(5),
            CancellationToken::new(),
            move |b| sink.lock().unwrap().push(b.len()),
        ));

        tx.send(ids(1)[0]).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*batches.lock().unwrap(), vec![1]);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_batcher() {
        let (_tx, rx) = mpsc::unbounded_channel::<ObjectId>();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_batcher(
            rx,
            4,
            Duration::from_millis(5),
            cancel.clone(),
            |_| {},
        ));
        cancel.cancel();
        handle.await.unwrap();
    }
}
