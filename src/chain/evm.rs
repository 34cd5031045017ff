//! EVM token bridge adapter with multi-RPC failover

use super::gas::{GasOracle, GasPrice};
use super::{ChainAdapter, SigningKey, SubmitRequest, TxReceipt, WalletBalance};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::vaa::SignedVaa;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

abigen!(
    TokenBridge,
    r#"[
        function isTransferCompleted(bytes32 hash) external view returns (bool)
        function completeTransfer(bytes encodedVm) external
        function completeTransferAndUnwrapETH(bytes encodedVm) external
    ]"#
);

pub struct EvmAdapter {
    chain_id: u16,
    name: String,
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    bridge: Address,
    wrapped_native: Option<[u8; 32]>,
    gas: GasOracle,
}

impl EvmAdapter {
    pub fn new(config: &ChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();
        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(500)));
                    debug!("Added HTTP provider for chain {}: {}", config.name, url);
                }
                Err(e) => warn!("Failed to create provider for {}: {}", url, e),
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let bridge = config
            .bridge_address
            .parse::<Address>()
            .map_err(|e| RelayerError::Config(format!("Invalid bridge address: {}", e)))?;

        let wrapped_native = match &config.wrapped_native_asset {
            Some(raw) => {
                let encoded = crate::vaa::encode_address(raw)?;
                let mut out = [0u8; 32];
                hex::decode_to_slice(&encoded, &mut out)
                    .map_err(|e| RelayerError::Config(e.to_string()))?;
                Some(out)
            }
            None => None,
        };

        Ok(Self {
            chain_id: config.chain_id,
            name: config.name.clone(),
            http_providers,
            current_provider: AtomicUsize::new(0),
            bridge,
            wrapped_native,
            gas: GasOracle::from_config(config),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.name, next);
    }

    fn wallet(&self, key: &SigningKey) -> RelayerResult<LocalWallet> {
        key.secret()
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))
    }

    fn connection_error(&self, message: impl Into<String>) -> RelayerError {
        RelayerError::ChainConnection {
            chain_id: self.chain_id,
            message: message.into(),
        }
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_id(&self) -> u16 {
        self.chain_id
    }

    fn wrapped_native_asset(&self) -> Option<[u8; 32]> {
        self.wrapped_native
    }

    async fn is_already_finalized(&self, vaa: &SignedVaa) -> RelayerResult<bool> {
        let digest = vaa.digest();
        for _ in 0..self.http_providers.len() {
            let bridge = TokenBridge::new(self.bridge, Arc::new(self.http().clone()));
            match bridge.is_transfer_completed(digest).call().await {
                Ok(done) => return Ok(done),
                Err(e) => {
                    warn!("isTransferCompleted failed on {}: {}", self.name, e);
                    self.failover();
                }
            }
        }
        Err(self.connection_error("All providers failed isTransferCompleted"))
    }

    async fn submit(
        &self,
        vaa: &SignedVaa,
        request: &SubmitRequest,
        key: &SigningKey,
    ) -> RelayerResult<TxReceipt> {
        let unwrap_native = match request {
            SubmitRequest::CompleteTransfer { unwrap_native } => *unwrap_native,
            SubmitRequest::Stream { instruction, .. } => {
                return Err(RelayerError::UnsupportedOperation(format!(
                    "{} on EVM chain {}",
                    instruction.method(),
                    self.name
                )))
            }
        };

        let provider = self.http().clone();
        let evm_chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;
        let wallet = self.wallet(key)?.with_chain_id(evm_chain_id.as_u64());
        let client = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        let bridge = TokenBridge::new(self.bridge, client);

        let encoded = Bytes::from(vaa.bytes().to_vec());
        let mut call = if unwrap_native {
            bridge.complete_transfer_and_unwrap_eth(encoded)
        } else {
            bridge.complete_transfer(encoded)
        };

        match self.gas.quote(&provider).await? {
            Some(GasPrice::Legacy(price)) => call = call.legacy().gas_price(price),
            Some(GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) => {
                if let Some(tx) = call.tx.as_eip1559_mut() {
                    tx.max_fee_per_gas = Some(max_fee_per_gas);
                    tx.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
                }
            }
            None => {}
        }

        let pending = call
            .send()
            .await
            .map_err(|e| RelayerError::Transaction(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        info!(
            "Submitted {} on {} as {:?} (key {})",
            if unwrap_native { "completeTransferAndUnwrapETH" } else { "completeTransfer" },
            self.name,
            tx_hash,
            key.index
        );

        let receipt = pending
            .await
            .map_err(|e| RelayerError::Transaction(e.to_string()))?
            .ok_or_else(|| RelayerError::Transaction(format!("{:?} dropped", tx_hash)))?;

        if receipt.status != Some(U64::from(1)) {
            return Err(RelayerError::Transaction(format!("{:?} reverted", tx_hash)));
        }

        Ok(TxReceipt {
            tx_hash: format!("{:?}", receipt.transaction_hash),
            block_number: receipt.block_number.map(|b| b.as_u64()),
        })
    }

    async fn balance(&self, key: &SigningKey) -> RelayerResult<WalletBalance> {
        let address = self.wallet(key)?.address();
        let wei = self
            .http()
            .get_balance(address, None)
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;
        let balance = ethers::utils::format_ether(wei)
            .parse::<f64>()
            .map_err(|e| RelayerError::Internal(e.to_string()))?;

        Ok(WalletBalance {
            currency: self.name.clone(),
            address: format!("{:?}", address),
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainFamily, GasPriceStrategy};

    fn config(rpc_urls: Vec<String>) -> ChainConfig {
        ChainConfig {
            chain_id: 4,
            name: "bsc".into(),
            family: ChainFamily::Evm,
            rpc_urls,
            bridge_address: "0xB6F6D86a8f9879A9c87f643768d9efc38c1Da6E7".into(),
            wrapped_native_asset: Some("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c".into()),
            gas_price_strategy: GasPriceStrategy::Auto,
            fee_multiplier_percent: 100,
            max_gas_price_gwei: 100,
            private_keys: vec![],
            enabled: true,
        }
    }

    #[test]
    fn test_new_pads_wrapped_asset() {
        let adapter = EvmAdapter::new(&config(vec!["http://localhost:8545".into()])).unwrap();
        let wrapped = adapter.wrapped_native_asset().unwrap();
        assert_eq!(&wrapped[..12], &[0u8; 12]);
        assert_eq!(wrapped[12], 0xbb);
        assert_eq!(adapter.chain_id(), 4);
    }

    #[test]
    fn test_new_requires_provider() {
        assert!(EvmAdapter::new(&config(vec![])).is_err());
    }

    #[test]
    fn test_failover_rotates() {
        let adapter = EvmAdapter::new(&config(vec![
            "http://a.invalid:8545".into(),
            "http://b.invalid:8545".into(),
        ]))
        .unwrap();
        adapter.failover();
        assert_eq!(adapter.current_provider.load(Ordering::Relaxed), 1);
        adapter.failover();
        assert_eq!(adapter.current_provider.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_stream_requests_unsupported() {
        let adapter = EvmAdapter::new(&config(vec!["http://localhost:8545".into()])).unwrap();
        let raw = crate::vaa::tests::build_vaa(1, [0u8; 32], 1, &[]);
        let vaa = SignedVaa::parse(&raw).unwrap();
        let request = SubmitRequest::Stream {
            instruction: crate::vaa::StreamInstruction::Deposit {
                depositor: [0u8; 32],
                amount: 1,
            },
            mint: [0u8; 32],
        };
        let key = SigningKey::new(4, 0, "unused");
        let err = adapter.submit(&vaa, &request, &key).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
