//! Relay queue protocol over the two-table store
//!
//! Every state transition a record goes through lives here: intake dedup and
//! enqueue, the worker claim, resolution after a relay attempt, and the
//! auditor's retire/requeue moves.

pub mod backlog;
pub mod backoff;

pub use backlog::Backlog;
pub use backoff::RetryPolicy;

use crate::backend::RelayResult;
use crate::error::RelayerResult;
use crate::metrics;
use crate::store::{QueueStore, Status, StoreKey, StorePayload, Table};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a known key was found during a dedup check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLocation {
    Backlog,
    Incoming,
    Working,
}

/// Outcome of attempting to move a key from `INCOMING` to `WORKING`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the record now
    Claimed(StorePayload),
    /// Someone else removed the key first
    Vanished,
    /// The key was already being worked; the duplicate was dropped
    AlreadyWorking,
}

/// Where a record went after a relay attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Written back into `WORKING` with a terminal status
    Terminal(Status),
    /// Returned to `INCOMING` for a backed-off retry
    Requeued { retries: u32 },
    /// The claim was taken away while relaying; nothing was written
    Abandoned,
}

/// Apply a relay result to a claimed record.
///
/// The attempt counter always advances. A non-completed result that has used up
/// the retry budget is forced to `FatalError`.
pub fn resolve_record(
    mut payload: StorePayload,
    status: Status,
    max_retries: u32,
    now: DateTime<Utc>,
) -> (StorePayload, Resolution) {
    payload.retries = payload.retries.saturating_add(1);
    payload.timestamp = now;
    payload.status = status;

    if !status.is_terminal() && payload.retries >= max_retries {
        payload.status = Status::FatalError;
    }

    let resolution = if payload.status.is_terminal() {
        Resolution::Terminal(payload.status)
    } else {
        Resolution::Requeued {
            retries: payload.retries,
        }
    };
    (payload, resolution)
}

/// Queue operations shared by intake, workers, auditors and monitors
pub struct RelayQueue {
    store: Arc<dyn QueueStore>,
    backlog: Backlog,
}

impl RelayQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            backlog: Backlog::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub async fn ping(&self) -> RelayerResult<()> {
        self.store.ping().await
    }

    /// Look for a key in the backlog, then `INCOMING`, then `WORKING`
    pub async fn check_queue(&self, key: &str) -> RelayerResult<Option<QueueLocation>> {
        if self.backlog.contains(key).await {
            return Ok(Some(QueueLocation::Backlog));
        }
        if self.store.get(Table::Incoming, key).await?.is_some() {
            return Ok(Some(QueueLocation::Incoming));
        }
        if self.store.get(Table::Working, key).await?.is_some() {
            return Ok(Some(QueueLocation::Working));
        }
        Ok(None)
    }

    /// Queue a fresh record through the backlog.
    ///
    /// Returns `false` if the key was already waiting in the backlog. A failed
    /// flush is not an error here: the record stays in memory for the drain task.
    pub async fn enqueue(&self, key: &StoreKey, payload: &StorePayload) -> RelayerResult<bool> {
        let key = key.to_json()?;
        if !self.backlog.push_if_absent(key, payload.to_json()?).await {
            return Ok(false);
        }
        if let Err(e) = self.flush_backlog().await {
            warn!("Backlog flush failed, will retry: {}", e);
        }
        Ok(true)
    }

    /// Flush the intake backlog into `INCOMING`
    pub async fn flush_backlog(&self) -> RelayerResult<usize> {
        let result = self.backlog.flush(self.store.as_ref()).await;
        metrics::set_backlog_length(self.backlog.len().await);
        result
    }

    pub async fn backlog_len(&self) -> usize {
        self.backlog.len().await
    }

    /// Records currently in a table, skipping ones that fail to decode
    pub async fn scan(&self, table: Table) -> RelayerResult<Vec<(String, StorePayload)>> {
        let mut out = Vec::new();
        for key in self.store.keys(table).await? {
            let Some(raw) = self.store.get(table, &key).await? else {
                continue;
            };
            match StorePayload::from_json(&raw) {
                Ok(payload) => out.push((key, payload)),
                Err(e) => warn!("Skipping {} record {}: {}", table, key, e),
            }
        }
        Ok(out)
    }

    /// Move a record from `INCOMING` into `WORKING` as `Pending`, stamped with the claim time.
    ///
    /// Deleting from `INCOMING` is the exclusion point: only the caller whose
    /// delete removed the key can proceed.
    pub async fn claim(&self, key: &str, now: DateTime<Utc>) -> RelayerResult<ClaimOutcome> {
        let Some(raw) = self.store.get(Table::Incoming, key).await? else {
            return Ok(ClaimOutcome::Vanished);
        };
        if !self.store.del(Table::Incoming, key).await? {
            return Ok(ClaimOutcome::Vanished);
        }
        if self.store.get(Table::Working, key).await?.is_some() {
            debug!("Key {} already in WORKING, dropping duplicate", key);
            return Ok(ClaimOutcome::AlreadyWorking);
        }

        let mut payload = StorePayload::from_json(&raw)?;
        payload.status = Status::Pending;
        payload.timestamp = now;
        let value = payload.to_json()?;
        self.store.set(Table::Working, key, &value).await?;
        // hand back the stored form so `resolve` can compare it byte for byte
        Ok(ClaimOutcome::Claimed(StorePayload::from_json(&value)?))
    }

    /// Record a relay attempt on a claimed record.
    ///
    /// `claimed` must be the payload returned by [`claim`](Self::claim). If
    /// `WORKING` no longer holds that exact claim (an auditor reclaimed it and
    /// another worker may own the key now) the result is dropped.
    pub async fn resolve(
        &self,
        key: &str,
        payload: StorePayload,
        result: &RelayResult,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> RelayerResult<Resolution> {
        let current = self.store.get(Table::Working, key).await?;
        let still_owned = match current.as_deref().map(StorePayload::from_json) {
            Some(Ok(stored)) => stored == payload,
            _ => false,
        };
        if !still_owned {
            warn!("Claim on {} was taken over, dropping result", key);
            return Ok(Resolution::Abandoned);
        }

        let (payload, resolution) = resolve_record(payload, result.status, max_retries, now);
        let value = payload.to_json()?;
        match resolution {
            Resolution::Terminal(_) => {
                self.store.set(Table::Working, key, &value).await?;
            }
            Resolution::Requeued { .. } => {
                self.store.del(Table::Working, key).await?;
                self.store.set(Table::Incoming, key, &value).await?;
            }
            Resolution::Abandoned => {}
        }
        Ok(resolution)
    }

    /// Remove a record from `WORKING`. `false` means another auditor got there first.
    pub async fn retire(&self, key: &str) -> RelayerResult<bool> {
        self.store.del(Table::Working, key).await
    }

    /// Put a record back into `INCOMING`
    pub async fn requeue(&self, key: &str, payload: &StorePayload) -> RelayerResult<()> {
        self.store
            .set(Table::Incoming, key, &payload.to_json()?)
            .await
    }

    /// Move every `WORKING` record back into `INCOMING` as fresh `Pending`
    pub async fn demote_working(&self, now: DateTime<Utc>) -> RelayerResult<usize> {
        let mut moved = 0;
        for (key, payload) in self.scan(Table::Working).await? {
            if !self.store.del(Table::Working, &key).await? {
                continue;
            }
            self.requeue(&key, &payload.reset(now)).await?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Empty both tables
    pub async fn clear(&self) -> RelayerResult<()> {
        for table in Table::ALL {
            self.store.clear(table).await?;
        }
        Ok(())
    }

    /// Number of records per source chain in each table
    pub async fn depths(&self) -> RelayerResult<HashMap<(Table, u16), usize>> {
        let mut depths = HashMap::new();
        for table in Table::ALL {
            for key in self.store.keys(table).await? {
                match StoreKey::from_json(&key) {
                    Ok(parsed) => *depths.entry((table, parsed.chain_id)).or_insert(0) += 1,
                    Err(_) => debug!("Ignoring foreign key {} in {}", key, table),
                }
            }
        }
        Ok(depths)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RelayerError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    pub(crate) fn key(sequence: u64) -> StoreKey {
        StoreKey {
            chain_id: 2,
            emitter_address: "0abc".into(),
            sequence,
        }
    }

    fn queue() -> (RelayQueue, MemoryStore) {
        let store = MemoryStore::new();
        (RelayQueue::new(Arc::new(store.clone())), store)
    }

    /// Store wrapper that can go offline and checks table exclusivity after every write
    #[derive(Default)]
    pub(crate) struct WatchedStore {
        pub inner: MemoryStore,
        pub offline: AtomicBool,
        pub violations: Mutex<Vec<String>>,
    }

    impl WatchedStore {
        async fn check(&self, key: &str) -> RelayerResult<()> {
            let in_incoming = self.inner.get(Table::Incoming, key).await?.is_some();
            let in_working = self.inner.get(Table::Working, key).await?.is_some();
            if in_incoming && in_working {
                self.violations.lock().unwrap().push(key.to_string());
            }
            Ok(())
        }

        fn online(&self) -> RelayerResult<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(RelayerError::Store("offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl QueueStore for WatchedStore {
        async fn get(&self, table: Table, key: &str) -> RelayerResult<Option<String>> {
            self.online()?;
            self.inner.get(table, key).await
        }
        async fn set(&self, table: Table, key: &str, value: &str) -> RelayerResult<()> {
            self.online()?;
            self.inner.set(table, key, value).await?;
            self.check(key).await
        }
        async fn del(&self, table: Table, key: &str) -> RelayerResult<bool> {
            self.online()?;
            self.inner.del(table, key).await
        }
        async fn keys(&self, table: Table) -> RelayerResult<Vec<String>> {
            self.online()?;
            self.inner.keys(table).await
        }
        async fn clear(&self, table: Table) -> RelayerResult<()> {
            self.online()?;
            self.inner.clear(table).await
        }
        async fn ping(&self) -> RelayerResult<()> {
            self.online()
        }
    }

    #[test]
    fn test_resolve_record_rules() {
        let now = Utc::now();
        let fresh = StorePayload::new("aa".into(), now);

        let (p, r) = resolve_record(fresh.clone(), Status::Error, 10, now);
        assert_eq!(r, Resolution::Requeued { retries: 1 });
        assert_eq!(p.status, Status::Error);

        let (p, r) = resolve_record(fresh.clone(), Status::Completed, 10, now);
        assert_eq!(r, Resolution::Terminal(Status::Completed));
        assert_eq!(p.retries, 1);

        let mut worn = fresh.clone();
        worn.retries = 9;
        let (p, r) = resolve_record(worn, Status::Error, 10, now);
        assert_eq!(r, Resolution::Terminal(Status::FatalError));
        assert_eq!(p.retries, 10);

        let (_, r) = resolve_record(fresh, Status::FatalError, 10, now);
        assert_eq!(r, Resolution::Terminal(Status::FatalError));
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_before_flush() {
        let store = Arc::new(WatchedStore::default());
        store.offline.store(true, Ordering::SeqCst);
        let queue = RelayQueue::new(store.clone());
        let k = key(10);
        let payload = StorePayload::new("aa".into(), Utc::now());

        assert!(queue.enqueue(&k, &payload).await.unwrap());
        assert_eq!(queue.backlog_len().await, 1);

        // the backlog answers the dedup check even while the store is down
        let found = queue.check_queue(&k.to_json().unwrap()).await.unwrap();
        assert_eq!(found, Some(QueueLocation::Backlog));
        assert!(!queue.enqueue(&k, &payload).await.unwrap());

        store.offline.store(false, Ordering::SeqCst);
        assert_eq!(queue.flush_backlog().await.unwrap(), 1);
        assert_eq!(store.inner.len(Table::Incoming), 1);
        assert_eq!(queue.backlog_len().await, 0);
        assert_eq!(
            queue.check_queue(&k.to_json().unwrap()).await.unwrap(),
            Some(QueueLocation::Incoming)
        );
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = Arc::new(WatchedStore::default());
        let queue = Arc::new(RelayQueue::new(store.clone()));
        let now = Utc::now();
        for seq in 0..20 {
            queue
                .enqueue(&key(seq), &StorePayload::new("aa".into(), now))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut won = Vec::new();
                for seq in 0..20 {
                    let k = key(seq).to_json().unwrap();
                    if let ClaimOutcome::Claimed(_) = queue.claim(&k, Utc::now()).await.unwrap() {
                        won.push(seq);
                    }
                }
                won
            }));
        }

        let mut all: Vec<u64> = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
        assert_eq!(store.inner.len(Table::Incoming), 0);
        assert_eq!(store.inner.len(Table::Working), 20);
        assert!(store.violations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_drops_duplicate_already_working() {
        let (queue, store) = queue();
        let k = key(1).to_json().unwrap();
        let payload = StorePayload::new("aa".into(), Utc::now()).to_json().unwrap();
        store.set(Table::Incoming, &k, &payload).await.unwrap();
        store.set(Table::Working, &k, &payload).await.unwrap();

        assert_eq!(
            queue.claim(&k, Utc::now()).await.unwrap(),
            ClaimOutcome::AlreadyWorking
        );
        assert_eq!(store.len(Table::Incoming), 0);
        assert_eq!(store.len(Table::Working), 1);
        assert_eq!(
            queue.claim(&k, Utc::now()).await.unwrap(),
            ClaimOutcome::Vanished
        );
    }

    #[tokio::test]
    async fn test_transient_error_requeues_with_backoff() {
        let (queue, store) = queue();
        let start = Utc::now();
        let k = key(10);
        queue
            .enqueue(&k, &StorePayload::new("aa".into(), start))
            .await
            .unwrap();
        let k = k.to_json().unwrap();

        let ClaimOutcome::Claimed(payload) = queue.claim(&k, start).await.unwrap() else {
            panic!("claim failed");
        };
        assert_eq!(store.len(Table::Working), 1);

        let failed = RelayResult::error("rpc timeout");
        let later = start + chrono::Duration::seconds(3);
        let resolution = queue.resolve(&k, payload, &failed, 10, later).await.unwrap();
        assert_eq!(resolution, Resolution::Requeued { retries: 1 });
        assert_eq!(store.len(Table::Working), 0);

        let raw = store.get(Table::Incoming, &k).await.unwrap().unwrap();
        let record = StorePayload::from_json(&raw).unwrap();
        assert_eq!(record.status, Status::Error);
        assert_eq!(record.retries, 1);
        assert_eq!(record.timestamp.timestamp_millis(), later.timestamp_millis());

        let policy = RetryPolicy::default();
        assert!(!policy.is_ready(&record, later + chrono::Duration::seconds(9)));
        assert!(policy.is_ready(&record, later + chrono::Duration::seconds(10)));
    }

    #[tokio::test]
    async fn test_completed_stays_in_working() {
        let (queue, store) = queue();
        let now = Utc::now();
        let k = key(3).to_json().unwrap();
        store
            .set(Table::Incoming, &k, &StorePayload::new("aa".into(), now).to_json().unwrap())
            .await
            .unwrap();

        let ClaimOutcome::Claimed(payload) = queue.claim(&k, now).await.unwrap() else {
            panic!("claim failed");
        };
        let done = RelayResult::completed("0xfeed");
        let resolution = queue.resolve(&k, payload, &done, 10, now).await.unwrap();
        assert_eq!(resolution, Resolution::Terminal(Status::Completed));

        let raw = store.get(Table::Working, &k).await.unwrap().unwrap();
        let record = StorePayload::from_json(&raw).unwrap();
        assert_eq!(record.status, Status::Completed);
        assert_eq!(record.retries, 1);
        assert_eq!(store.len(Table::Incoming), 0);
    }

    #[tokio::test]
    async fn test_resolve_without_claim_writes_nothing() {
        let (queue, store) = queue();
        let now = Utc::now();
        let k = key(5).to_json().unwrap();
        store
            .set(Table::Incoming, &k, &StorePayload::new("aa".into(), now).to_json().unwrap())
            .await
            .unwrap();
        let ClaimOutcome::Claimed(payload) = queue.claim(&k, now).await.unwrap() else {
            panic!("claim failed");
        };
        assert!(queue.retire(&k).await.unwrap());

        let resolution = queue
            .resolve(&k, payload, &RelayResult::error("late"), 10, now)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Abandoned);
        assert_eq!(store.len(Table::Incoming), 0);
        assert_eq!(store.len(Table::Working), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_never_return_to_incoming() {
        let (queue, store) = queue();
        let now = Utc::now();
        let k = key(4).to_json().unwrap();
        let mut payload = StorePayload::new("aa".into(), now);
        payload.retries = 9;
        payload.status = Status::Error;
        store.set(Table::Incoming, &k, &payload.to_json().unwrap()).await.unwrap();

        let ClaimOutcome::Claimed(claimed) = queue.claim(&k, now).await.unwrap() else {
            panic!("claim failed");
        };
        let resolution = queue
            .resolve(&k, claimed, &RelayResult::error("still failing"), 10, now)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Terminal(Status::FatalError));
        assert_eq!(store.len(Table::Incoming), 0);

        let record =
            StorePayload::from_json(&store.get(Table::Working, &k).await.unwrap().unwrap()).unwrap();
        assert_eq!(record.status, Status::FatalError);
    }

    #[tokio::test]
    async fn test_demote_and_depths() {
        let (queue, store) = queue();
        let now = Utc::now();
        let mut done = StorePayload::new("aa".into(), now);
        done.status = Status::Completed;
        done.retries = 2;
        store
            .set(Table::Working, &key(1).to_json().unwrap(), &done.to_json().unwrap())
            .await
            .unwrap();
        store
            .set(Table::Incoming, &key(2).to_json().unwrap(), &done.to_json().unwrap())
            .await
            .unwrap();
        store.set(Table::Incoming, "garbage", "{}").await.unwrap();

        let depths = queue.depths().await.unwrap();
        assert_eq!(depths.get(&(Table::Incoming, 2)), Some(&1));
        assert_eq!(depths.get(&(Table::Working, 2)), Some(&1));

        assert_eq!(queue.demote_working(now).await.unwrap(), 1);
        assert_eq!(store.len(Table::Working), 0);
        let raw = store
            .get(Table::Incoming, &key(1).to_json().unwrap())
            .await
            .unwrap()
            .unwrap();
        let record = StorePayload::from_json(&raw).unwrap();
        assert_eq!((record.status, record.retries), (Status::Pending, 0));

        queue.clear().await.unwrap();
        assert_eq!(store.len(Table::Incoming), 0);
    }
}
