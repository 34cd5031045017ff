//! In-process store with the same semantics as the Redis tables

use super::{QueueStore, Table};
use crate::error::RelayerResult;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// MemoryStore keeps both tables in concurrent maps. Used by tests and
/// single-process development runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    incoming: Arc<DashMap<String, String>>,
    working: Arc<DashMap<String, String>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("incoming", &self.incoming.len())
            .field("working", &self.working.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, table: Table) -> &DashMap<String, String> {
        match table {
            Table::Incoming => &self.incoming,
            Table::Working => &self.working,
        }
    }

    pub fn len(&self, table: Table) -> usize {
        self.table(table).len()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn get(&self, table: Table, key: &str) -> RelayerResult<Option<String>> {
        Ok(self.table(table).get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, table: Table, key: &str, value: &str) -> RelayerResult<()> {
        self.table(table).insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, table: Table, key: &str) -> RelayerResult<bool> {
        Ok(self.table(table).remove(key).is_some())
    }

    async fn keys(&self, table: Table) -> RelayerResult<Vec<String>> {
        Ok(self.table(table).iter().map(|e| e.key().clone()).collect())
    }

    async fn clear(&self, table: Table) -> RelayerResult<()> {
        self.table(table).clear();
        Ok(())
    }

    async fn ping(&self) -> RelayerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tables_are_independent() {
        let store = MemoryStore::new();
        store.set(Table::Incoming, "k", "v1").await.unwrap();
        store.set(Table::Working, "k", "v2").await.unwrap();

        assert_eq!(store.get(Table::Incoming, "k").await.unwrap().as_deref(), Some("v1"));
        assert_eq!(store.get(Table::Working, "k").await.unwrap().as_deref(), Some("v2"));

        assert!(store.del(Table::Incoming, "k").await.unwrap());
        assert!(!store.del(Table::Incoming, "k").await.unwrap());
        assert_eq!(store.keys(Table::Working).await.unwrap(), vec!["k".to_string()]);

        tokio_test::assert_ok!(store.clear(Table::Working).await);
        assert_eq!(store.len(Table::Working), 0);
        tokio_test::assert_ok!(store.ping().await);
    }
}
