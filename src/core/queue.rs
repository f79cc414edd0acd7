// Joinable work queue shared by the sequential workers

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};

use crate::error::LaunchError;

/// Multi-consumer queue that tracks how many enqueued items are still
/// unfinished. [`join`](Self::join) resolves once every item put so far has
/// been acknowledged with [`task_done`](Self::task_done).
pub struct JoinableQueue<T> {
    sender: mpsc::UnboundedSender<T>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
    unfinished: Arc<watch::Sender<usize>>,
}

impl<T> Clone for JoinableQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            unfinished: self.unfinished.clone(),
        }
    }
}

impl<T> Default for JoinableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JoinableQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (unfinished, _) = watch::channel(0usize);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            unfinished: Arc::new(unfinished),
        }
    }

    pub fn put(&self, item: T) -> Result<(), LaunchError> {
        self.unfinished.send_modify(|n| *n += 1);
        if self.sender.send(item).is_err() {
            self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
            return Err(LaunchError::QueueClosed);
        }
        Ok(())
    }

    /// Waits for the next item. Only one consumer waits on the channel at a
    /// time; the others queue up on the receiver lock.
    pub async fn get(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    /// Marks one previously fetched item as processed.
    pub fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so waiting cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
