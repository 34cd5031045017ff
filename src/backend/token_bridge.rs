//! Token bridge transfer policy
//!
//! Accepts transfers of allow-listed tokens that pay a relayer fee and redeems
//! them on the payload's target chain.

use super::{EmitterFilter, Listener, ParsedMessage, RelayResult, Relayer};
use crate::chain::{ChainRegistry, SigningKey, SubmitRequest};
use crate::config::SupportedToken;
use crate::error::RelayerResult;
use crate::vaa::transfer::TRANSFER_PAYLOAD_ID;
use crate::vaa::{self, SignedVaa, TransferPayload};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TokenBridgePolicy {
    filters: Vec<EmitterFilter>,
    /// (origin chain, 32-byte hex origin address)
    supported_tokens: HashSet<(u16, String)>,
    chains: Arc<ChainRegistry>,
}

impl TokenBridgePolicy {
    pub fn new(
        filters: Vec<EmitterFilter>,
        tokens: &[SupportedToken],
        chains: Arc<ChainRegistry>,
    ) -> RelayerResult<Self> {
        let supported_tokens = tokens
            .iter()
            .map(|t| Ok((t.chain_id, vaa::encode_address(&t.address)?)))
            .collect::<RelayerResult<HashSet<_>>>()?;
        if supported_tokens.is_empty() {
            warn!("No supported tokens configured, every transfer will be rejected");
        }
        Ok(Self {
            filters,
            supported_tokens,
            chains,
        })
    }
}

impl Listener for TokenBridgePolicy {
    fn validate(&self, raw: &[u8]) -> Result<ParsedMessage, String> {
        let vaa = SignedVaa::parse(raw).map_err(|e| format!("Unable to parse VAA: {}", e))?;

        if vaa.payload().first() != Some(&TRANSFER_PAYLOAD_ID) {
            return Err("Wrong payload type".into());
        }
        let transfer = TransferPayload::parse(vaa.payload())
            .map_err(|e| format!("Payload parsing failure: {}", e))?;

        if transfer.fee.is_zero() {
            return Err("Validation failed: no relayer fee".into());
        }
        let origin = (transfer.origin_chain, transfer.origin_address_hex());
        if !self.supported_tokens.contains(&origin) {
            return Err(format!(
                "Validation failed: token {} on chain {} not supported",
                origin.1, origin.0
            ));
        }

        let summary = format!(
            "transfer of {} (token {} on chain {}) to chain {} recipient {} fee {}",
            transfer.amount,
            origin.1,
            origin.0,
            transfer.target_chain,
            transfer.target_address_hex(),
            transfer.fee
        );
        Ok(ParsedMessage { vaa, summary })
    }

    fn emitter_filters(&self) -> Vec<EmitterFilter> {
        self.filters.clone()
    }
}

#[async_trait]
impl Relayer for TokenBridgePolicy {
    fn target_chain_id(&self, vaa: &SignedVaa) -> RelayerResult<u16> {
        Ok(TransferPayload::parse(vaa.payload())?.target_chain)
    }

    fn routes_by_destination(&self) -> bool {
        true
    }

    async fn relay(
        &self,
        vaa_hex: &str,
        check_only: bool,
        key: &SigningKey,
    ) -> RelayerResult<RelayResult> {
        let vaa = match SignedVaa::from_hex(vaa_hex) {
            Ok(vaa) => vaa,
            Err(e) => return Ok(RelayResult::fatal(e.to_string())),
        };
        let transfer = match TransferPayload::parse(vaa.payload()) {
            Ok(transfer) => transfer,
            Err(e) => return Ok(RelayResult::fatal(format!("Invalid payload type: {}", e))),
        };
        let Some(adapter) = self.chains.get(transfer.target_chain) else {
            return Ok(RelayResult::fatal(format!(
                "target chain {} not supported",
                transfer.target_chain
            )));
        };

        if adapter.is_already_finalized(&vaa).await? {
            debug!("Transfer {}/{} already redeemed", vaa.emitter_chain, vaa.sequence);
            return Ok(RelayResult::completed("Already redeemed"));
        }
        if check_only {
            return Ok(RelayResult::pending("Not redeemed"));
        }

        let unwrap_native = transfer.origin_chain == transfer.target_chain
            && adapter.wrapped_native_asset() == Some(transfer.origin_address);
        let request = SubmitRequest::CompleteTransfer { unwrap_native };

        match adapter.submit(&vaa, &request, key).await {
            Ok(receipt) => Ok(RelayResult::completed(receipt.tx_hash)),
            Err(e) => {
                warn!(
                    "Redeem on chain {} failed for sequence {}: {}",
                    transfer.target_chain, vaa.sequence, e
                );
                Ok(RelayResult::from_error(&e))
            }
        }
    }
}
