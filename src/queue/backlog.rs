//! In-memory intake backlog
//!
//! Accepted messages land here first and are flushed into `INCOMING` in FIFO
//! order. Flushes are serialized by a single lock, so entries leave the backlog
//! strictly one at a time and only after the store accepted them.

use crate::error::RelayerResult;
use crate::store::{QueueStore, Table};

use std::collections::VecDeque;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct Backlog {
    entries: Mutex<VecDeque<BacklogEntry>>,
    flush_lock: Mutex<()>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.iter().any(|e| e.key == key)
    }

    /// Append unless the key is already waiting; returns false on a duplicate
    pub async fn push_if_absent(&self, key: String, value: String) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.key == key) {
            return false;
        }
        entries.push_back(BacklogEntry { key, value });
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Write waiting entries into `INCOMING`, oldest first.
    ///
    /// Stops at the first store failure; that entry and everything behind it stay queued.
    pub async fn flush(&self, store: &dyn QueueStore) -> RelayerResult<usize> {
        let _guard = self.flush_lock.lock().await;
        let mut flushed = 0;
        loop {
            let front = self.entries.lock().await.front().cloned();
            let Some(entry) = front else {
                break;
            };
            store.set(Table::Incoming, &entry.key, &entry.value).await?;
            self.entries.lock().await.pop_front();
            flushed += 1;
        }
        Ok(flushed)
    }
}
