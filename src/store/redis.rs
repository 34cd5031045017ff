//! Redis-backed queue store
//!
//! Each table is its own logical database, so a key can be looked up in
//! `INCOMING` and `WORKING` without any prefixing.

use super::{QueueStore, Table};
use crate::config::RedisConfig;
use crate::error::RelayerResult;

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use tracing::{debug, info};

const SCAN_BATCH: usize = 100;

/// One managed connection per table; reconnects are handled by the manager
#[derive(Clone)]
pub struct RedisStore {
    incoming: ConnectionManager,
    working: ConnectionManager,
}

impl RedisStore {
    /// Connect both tables
    pub async fn connect(config: &RedisConfig) -> RelayerResult<Self> {
        let incoming = Self::open(config, Table::Incoming).await?;
        let working = Self::open(config, Table::Working).await?;
        info!("Connected to redis at {}:{}", config.host, config.port);
        Ok(Self { incoming, working })
    }

    async fn open(config: &RedisConfig, table: Table) -> RelayerResult<ConnectionManager> {
        let client = ::redis::Client::open(config.url(table.db()))?;
        let manager = ConnectionManager::new(client).await?;
        debug!("Opened redis table {} (db {})", table, table.db());
        Ok(manager)
    }

    fn conn(&self, table: Table) -> ConnectionManager {
        match table {
            Table::Incoming => self.incoming.clone(),
            Table::Working => self.working.clone(),
        }
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn get(&self, table: Table, key: &str) -> RelayerResult<Option<String>> {
        let mut conn = self.conn(table);
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, table: Table, key: &str, value: &str) -> RelayerResult<()> {
        let mut conn = self.conn(table);
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn del(&self, table: Table, key: &str) -> RelayerResult<bool> {
        let mut conn = self.conn(table);
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn keys(&self, table: Table) -> RelayerResult<Vec<String>> {
        let mut conn = self.conn(table);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn clear(&self, table: Table) -> RelayerResult<()> {
        let mut conn = self.conn(table);
        ::redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> RelayerResult<()> {
        let mut conn = self.conn(Table::Incoming);
        ::redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testcontainers::{clients::Cli, core::WaitFor, GenericImage};

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_redis_tables_roundtrip() {
        let docker = Cli::default();
        let image = GenericImage::new("redis", "7-alpine")
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
        let node = docker.run(image);

        let config = RedisConfig {
            host: "127.0.0.1".into(),
            port: node.get_host_port_ipv4(6379),
        };
        let store = RedisStore::connect(&config).await.unwrap();
        store.ping().await.unwrap();

        for i in 0..250 {
            store
                .set(Table::Incoming, &format!("key-{}", i), "v")
                .await
                .unwrap();
        }
        store.set(Table::Working, "key-0", "w").await.unwrap();

        assert_eq!(store.keys(Table::Incoming).await.unwrap().len(), 250);
        assert_eq!(store.get(Table::Working, "key-0").await.unwrap().as_deref(), Some("w"));
        assert!(store.del(Table::Incoming, "key-0").await.unwrap());
        assert!(!store.del(Table::Incoming, "key-0").await.unwrap());

        store.clear(Table::Incoming).await.unwrap();
        assert!(store.keys(Table::Incoming).await.unwrap().is_empty());
        assert_eq!(store.keys(Table::Working).await.unwrap().len(), 1);
    }
}
