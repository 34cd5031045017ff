//! Token streaming protocol policy
//!
//! Every streaming message is executed on one fixed chain, so workers do not
//! route by destination. Any message with a parseable streaming payload is
//! accepted.

use super::{EmitterFilter, Listener, ParsedMessage, RelayResult, Relayer};
use crate::chain::{ChainRegistry, SigningKey, SubmitRequest};
use crate::error::RelayerResult;
use crate::vaa::{Asset, SignedVaa, StreamPayload};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct StreamPolicy {
    target_chain: u16,
    filters: Vec<EmitterFilter>,
    chains: Arc<ChainRegistry>,
}

impl StreamPolicy {
    pub fn new(target_chain: u16, filters: Vec<EmitterFilter>, chains: Arc<ChainRegistry>) -> Self {
        Self {
            target_chain,
            filters,
            chains,
        }
    }
}

impl Listener for StreamPolicy {
    fn validate(&self, raw: &[u8]) -> Result<ParsedMessage, String> {
        let vaa = SignedVaa::parse(raw).map_err(|e| format!("Unable to parse VAA: {}", e))?;
        let payload = StreamPayload::parse(vaa.payload())
            .map_err(|e| format!("Payload parsing failure: {}", e))?;
        Ok(ParsedMessage {
            summary: payload.summary(),
            vaa,
        })
    }

    fn emitter_filters(&self) -> Vec<EmitterFilter> {
        self.filters.clone()
    }
}

#[async_trait]
impl Relayer for StreamPolicy {
    fn target_chain_id(&self, _vaa: &SignedVaa) -> RelayerResult<u16> {
        Ok(self.target_chain)
    }

    fn routes_by_destination(&self) -> bool {
        false
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
        let payload = match StreamPayload::parse(vaa.payload()) {
            Ok(payload) => payload,
            Err(e) => return Ok(RelayResult::fatal(format!("Invalid payload type: {}", e))),
        };
        let Some(adapter) = self.chains.get(self.target_chain) else {
            return Ok(RelayResult::fatal(format!(
                "target chain {} not supported",
                self.target_chain
            )));
        };

        if adapter.is_already_finalized(&vaa).await? {
            debug!("Stream message {}/{} already relayed", vaa.emitter_chain, vaa.sequence);
            return Ok(RelayResult::completed("Already relayed"));
        }
        if check_only {
            return Ok(RelayResult::pending("Not relayed"));
        }

        let request = match payload.asset {
            Asset::Token { mint } => SubmitRequest::Stream {
                instruction: payload.instruction.clone(),
                mint,
            },
            Asset::Native => {
                return Ok(RelayResult::fatal(format!(
                    "native asset {} is not supported",
                    payload.instruction.method()
                )))
            }
        };

        info!("Relaying {} for sequence {}", payload.summary(), vaa.sequence);
        match adapter.submit(&vaa, &request, key).await {
            Ok(receipt) => Ok(RelayResult::completed(receipt.tx_hash)),
            Err(e) => {
                warn!(
                    "{} failed for sequence {}: {}",
                    payload.instruction.method(),
                    vaa.sequence,
                    e
                );
                Ok(RelayResult::from_error(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainAdapter, TxReceipt};
    use crate::store::Status;
    use crate::vaa::stream::tests::encode_deposit;
    use crate::vaa::tests::build_vaa;

    fn policy(adapter: MockChainAdapter) -> StreamPolicy {
        let chains = ChainRegistry::new();
        chains.insert(Arc::new(adapter));
        StreamPolicy::new(1, vec![], Arc::new(chains))
    }

    fn solana() -> MockChainAdapter {
        let mut adapter = MockChainAdapter::new();
        adapter.expect_chain_id().return_const(1u16);
        adapter
    }

    #[test]
    fn test_accepts_any_stream_payload() {
        let policy = policy(solana());
        let raw = build_vaa(4, [3u8; 32], 1, &encode_deposit(Asset::Native, 1, 10));
        let parsed = policy.validate(&raw).unwrap();
        assert!(parsed.summary.starts_with("deposit of native"));

        let raw = build_vaa(4, [3u8; 32], 1, &[99, 0, 0, 1]);
        assert!(policy.validate(&raw).is_err());

        assert!(!policy.routes_by_destination());
    }

    #[tokio::test]
    async fn test_token_instruction_submitted() {
        let mut chain = solana();
        chain.expect_is_already_finalized().returning(|_| Ok(false));
        chain
            .expect_submit()
            .withf(|_, request, _| {
                matches!(request, SubmitRequest::Stream { mint, .. } if *mint == [5u8; 32])
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(TxReceipt {
                    tx_hash: "sig".into(),
                    block_number: None,
                })
            });
        let policy = policy(chain);

        let raw = build_vaa(4, [3u8; 32], 1, &encode_deposit(Asset::Token { mint: [5u8; 32] }, 1, 10));
        let result = policy
            .relay(&hex::encode(raw), false, &SigningKey::new(1, 0, "k"))
            .await
            .unwrap();
        assert_eq!(result, RelayResult::completed("sig"));
    }

    #[tokio::test]
    async fn test_native_instruction_is_fatal() {
        let mut chain = solana();
        chain.expect_is_already_finalized().returning(|_| Ok(false));
        chain.expect_submit().never();
        let policy = policy(chain);

        let raw = build_vaa(4, [3u8; 32], 1, &encode_deposit(Asset::Native, 1, 10));
        let result = policy
            .relay(&hex::encode(raw), false, &SigningKey::new(1, 0, "k"))
            .await
            .unwrap();
        assert_eq!(result.status, Status::FatalError);
    }

    #[tokio::test]
    async fn test_already_relayed() {
        let mut chain = solana();
        chain.expect_is_already_finalized().returning(|_| Ok(true));
        let policy = policy(chain);

        let raw = build_vaa(4, [3u8; 32], 1, &encode_deposit(Asset::Native, 1, 10));
        let result = policy
            .relay(&hex::encode(raw), true, &SigningKey::new(1, 0, "k"))
            .await
            .unwrap();
        assert_eq!(result.status, Status::Completed);
    }
}
