//! Periodic gauges for queue depth and relayer wallet balances

use crate::chain::ChainRegistry;
use crate::error::RelayerResult;
use crate::metrics;
use crate::queue::RelayQueue;
use crate::store::Table;
use crate::vaa::chains;
use crate::worker::WorkerDescriptor;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Publishes `queue_length{queue, source_chain}` for both tables
pub struct QueueMonitor {
    queue: Arc<RelayQueue>,
    /// Source chains that always get a series, even when empty
    known_chains: BTreeSet<u16>,
    interval: Duration,
}

impl QueueMonitor {
    pub fn new(queue: Arc<RelayQueue>, known_chains: BTreeSet<u16>, interval: Duration) -> Self {
        Self {
            queue,
            known_chains,
            interval,
        }
    }

    pub async fn sample(&self) -> RelayerResult<()> {
        let depths = self.queue.depths().await?;
        let mut chains_seen = self.known_chains.clone();
        chains_seen.extend(depths.keys().map(|(_, chain)| *chain));

        for table in Table::ALL {
            for chain in &chains_seen {
                let len = depths.get(&(table, *chain)).copied().unwrap_or(0);
                metrics::set_queue_length(table, &chains::name(*chain), len);
            }
        }
        metrics::set_backlog_length(self.queue.backlog_len().await);
        debug!("Queue depths: {:?}", depths);
        Ok(())
    }

    pub async fn run(self) -> RelayerResult<()> {
        loop {
            if let Err(e) = self.sample().await {
                warn!("Queue depth sample failed: {}", e);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Publishes the native balance of every signing key
pub struct WalletMonitor {
    chains: Arc<ChainRegistry>,
    descriptors: Vec<WorkerDescriptor>,
    interval: Duration,
}

impl WalletMonitor {
    pub fn new(chains: Arc<ChainRegistry>, descriptors: Vec<WorkerDescriptor>, interval: Duration) -> Self {
        Self {
            chains,
            descriptors,
            interval,
        }
    }

    /// Returns how many balances were refreshed
    pub async fn sample(&self) -> usize {
        let mut refreshed = 0;
        for descriptor in &self.descriptors {
            let Some(adapter) = self.chains.get(descriptor.target_chain_id) else {
                continue;
            };
            match adapter.balance(&descriptor.signing_key).await {
                Ok(balance) => {
                    metrics::record_wallet_balance(
                        &balance.currency,
                        &balance.address,
                        &descriptor.target_chain_name,
                        balance.balance,
                    );
                    refreshed += 1;
                }
                Err(e) => warn!(
                    "Balance of key {} on {} unavailable: {}",
                    descriptor.index, descriptor.target_chain_name, e
                ),
            }
        }
        refreshed
    }

    pub async fn run(self) -> RelayerResult<()> {
        loop {
            let refreshed = self.sample().await;
            debug!("Refreshed {} wallet balances", refreshed);
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainAdapter, SigningKey, WalletBalance};
    use crate::error::RelayerError;
    use crate::queue::tests::key;
    use crate::store::{MemoryStore, QueueStore, StorePayload};
    use chrono::Utc;

    #[tokio::test]
    async fn test_queue_monitor_zero_fills_known_chains() {
        let store = MemoryStore::new();
        let queue = Arc::new(RelayQueue::new(Arc::new(store.clone())));
        let payload = StorePayload::new("00".into(), Utc::now()).to_json().unwrap();
        store
            .set(Table::Incoming, &key(1).to_json().unwrap(), &payload)
            .await
            .unwrap();

        let monitor = QueueMonitor::new(queue, BTreeSet::from([6]), Duration::from_secs(10));
        monitor.sample().await.unwrap();

        let incoming = |chain: &str| {
            metrics::QUEUE_LENGTH
                .with_label_values(&["incoming", chain])
                .get()
        };
        assert_eq!(incoming("ethereum"), 1.0);
        assert_eq!(incoming("avalanche"), 0.0);
    }

    #[tokio::test]
    async fn test_wallet_monitor_skips_failures() {
        let mut good = MockChainAdapter::new();
        good.expect_chain_id().return_const(5u16);
        good.expect_balance().returning(|_| {
            Ok(WalletBalance {
                currency: "MATIC".into(),
                address: "0xwallet".into(),
                balance: 12.5,
            })
        });
        let mut bad = MockChainAdapter::new();
        bad.expect_chain_id().return_const(10u16);
        bad.expect_balance()
            .returning(|_| Err(RelayerError::ChainConnection { chain_id: 10, message: "down".into() }));

        let registry = ChainRegistry::new();
        registry.insert(Arc::new(good));
        registry.insert(Arc::new(bad));

        let descriptors = [(5u16, "polygon"), (10u16, "fantom")]
            .into_iter()
            .map(|(chain_id, name)| WorkerDescriptor {
                index: 0,
                target_chain_id: chain_id,
                target_chain_name: name.into(),
                signing_key: SigningKey::new(chain_id, 0, "k"),
            })
            .collect();
        let monitor = WalletMonitor::new(Arc::new(registry), descriptors, Duration::from_secs(60));

        assert_eq!(monitor.sample().await, 1);
        assert_eq!(
            metrics::WALLET_BALANCE
                .with_label_values(&["MATIC", "0xwallet", "polygon"])
                .get(),
            12.5
        );
    }
}
