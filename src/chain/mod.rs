//! Chain module - destination chain access for relaying
//!
//! This module provides:
//! - The [`ChainAdapter`] seam backends submit through
//! - An EVM adapter with multi-RPC failover
//! - Per-chain gas pricing strategies
//! - A registry of adapters keyed by wormhole chain id

pub mod evm;
pub mod gas;

pub use evm::EvmAdapter;
pub use gas::{GasOracle, GasPrice};

use crate::config::{ChainFamily, Settings};
use crate::error::RelayerResult;
use crate::vaa::{SignedVaa, StreamInstruction};

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A relayer signing key bound to one destination chain
#[derive(Clone)]
pub struct SigningKey {
    pub chain_id: u16,
    pub index: usize,
    secret: String,
}

impl SigningKey {
    pub fn new(chain_id: u16, index: usize, secret: impl Into<String>) -> Self {
        Self {
            chain_id,
            index,
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("chain_id", &self.chain_id)
            .field("index", &self.index)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// What the destination chain should do with a VAA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRequest {
    /// Redeem a token transfer, optionally unwrapping the native asset
    CompleteTransfer { unwrap_native: bool },
    /// Execute a streaming program instruction for an SPL token
    Stream {
        instruction: StreamInstruction,
        mint: [u8; 32],
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalance {
    pub currency: String,
    pub address: String,
    pub balance: f64,
}

/// Destination chain operations. Both relay-path calls are safe to repeat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> u16;

    /// Wrapped native asset as it appears in transfer payloads
    fn wrapped_native_asset(&self) -> Option<[u8; 32]>;

    /// Whether the message has already been redeemed on this chain
    async fn is_already_finalized(&self, vaa: &SignedVaa) -> RelayerResult<bool>;

    /// Submit the message and wait for inclusion
    async fn submit(
        &self,
        vaa: &SignedVaa,
        request: &SubmitRequest,
        key: &SigningKey,
    ) -> RelayerResult<TxReceipt>;

    async fn balance(&self, key: &SigningKey) -> RelayerResult<WalletBalance>;
}

/// Adapters for every configured destination chain
#[derive(Default)]
pub struct ChainRegistry {
    adapters: DashMap<u16, Arc<dyn ChainAdapter>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for all enabled chains
    pub fn from_settings(settings: &Settings) -> RelayerResult<Self> {
        let registry = Self::new();
        for (name, chain_config) in settings.enabled_chains() {
            match chain_config.family {
                ChainFamily::Evm => {
                    let adapter = EvmAdapter::new(chain_config)?;
                    registry.insert(Arc::new(adapter));
                    info!(
                        "Initialized chain {} (wormhole id {})",
                        chain_config.name, chain_config.chain_id
                    );
                }
                ChainFamily::Solana => {
                    warn!("Chain {} has no transaction adapter, relays to it will fail", name);
                }
            }
        }
        Ok(registry)
    }

    pub fn insert(&self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain_id(), adapter);
    }

    pub fn get(&self, chain_id: u16) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(&chain_id).map(|a| a.clone())
    }

    pub fn chain_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.adapters.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_debug_redacts_secret() {
        let key = SigningKey::new(2, 0, "deadbeef");
        let shown = format!("{:?}", key);
        assert!(!shown.contains("deadbeef"));
        assert!(shown.contains("redacted"));
        assert_eq!(key.secret(), "deadbeef");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ChainRegistry::new();
        let mut adapter = MockChainAdapter::new();
        adapter.expect_chain_id().return_const(4u16);
        registry.insert(Arc::new(adapter));

        assert!(registry.get(4).is_some());
        assert!(registry.get(2).is_none());
        assert_eq!(registry.chain_ids(), vec![4]);
    }
}
