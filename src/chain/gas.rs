//! Gas pricing per chain strategy

use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{RelayerError, RelayerResult};

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{BlockNumber, U256};
use tracing::debug;

const GWEI: u64 = 1_000_000_000;

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Prices relay transactions for one chain
#[derive(Debug, Clone)]
pub struct GasOracle {
    strategy: GasPriceStrategy,
    /// Percentage applied to estimates (100 = unchanged)
    multiplier_percent: u64,
    max_gas_price: U256,
}

impl GasOracle {
    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            strategy: config.gas_price_strategy,
            multiplier_percent: config.fee_multiplier_percent,
            max_gas_price: U256::from(config.max_gas_price_gwei) * U256::from(GWEI),
        }
    }

    /// Price overrides for the next transaction. `None` leaves pricing to the provider.
    pub async fn quote(&self, provider: &Provider<Http>) -> RelayerResult<Option<GasPrice>> {
        let price = match self.strategy {
            GasPriceStrategy::Auto => return Ok(None),
            GasPriceStrategy::Legacy => {
                let price = provider
                    .get_gas_price()
                    .await
                    .map_err(|e| RelayerError::GasEstimation(e.to_string()))?;
                GasPrice::Legacy(price)
            }
            GasPriceStrategy::Eip1559 => self.estimate_eip1559_fees(provider).await?,
        };

        let adjusted = self.adjust(price);
        debug!("Gas quote: {:?}", adjusted);
        Ok(Some(adjusted))
    }

    /// EIP-1559 fees from the latest base fee
    async fn estimate_eip1559_fees(&self, provider: &Provider<Http>) -> RelayerResult<GasPrice> {
        let block = provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| RelayerError::GasEstimation(e.to_string()))?
            .ok_or_else(|| RelayerError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| RelayerError::GasEstimation("No base fee in block".to_string()))?;

        let priority_fee = U256::from(2 * GWEI);
        Ok(GasPrice::Eip1559 {
            max_fee_per_gas: base_fee * 2 + priority_fee,
            max_priority_fee_per_gas: priority_fee,
        })
    }

    /// Apply the chain multiplier, then cap at the configured maximum
    pub fn adjust(&self, price: GasPrice) -> GasPrice {
        let scale = |v: U256| {
            let scaled = v * U256::from(self.multiplier_percent) / U256::from(100u64);
            std::cmp::min(scaled, self.max_gas_price)
        };
        match price {
            GasPrice::Legacy(p) => GasPrice::Legacy(scale(p)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee_per_gas = scale(max_fee_per_gas);
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas: std::cmp::min(
                        scale(max_priority_fee_per_gas),
                        max_fee_per_gas,
                    ),
                }
            }
        }
    }
}
