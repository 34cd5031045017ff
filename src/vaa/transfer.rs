//! Token bridge transfer payload (payload id 1)

use super::read_array;
use crate::error::{RelayerError, RelayerResult};

use ethers::types::U256;

pub const TRANSFER_PAYLOAD_ID: u8 = 1;
const TRANSFER_LEN: usize = 133;

/// `id u8 | amount u256 | token_address [32] | token_chain u16 | to [32] | to_chain u16 | fee u256`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPayload {
    pub amount: U256,
    pub origin_address: [u8; 32],
    pub origin_chain: u16,
    pub target_address: [u8; 32],
    pub target_chain: u16,
    pub fee: U256,
}

impl TransferPayload {
    pub fn parse(payload: &[u8]) -> RelayerResult<Self> {
        match payload.first() {
            Some(&TRANSFER_PAYLOAD_ID) => {}
            Some(other) => {
                return Err(RelayerError::PayloadParsing(format!(
                    "payload id {} is not a transfer",
                    other
                )))
            }
            None => return Err(RelayerError::PayloadParsing("empty payload".into())),
        }
        if payload.len() < TRANSFER_LEN {
            return Err(RelayerError::PayloadParsing(format!(
                "transfer payload is {} bytes, need {}",
                payload.len(),
                TRANSFER_LEN
            )));
        }

        Ok(Self {
            amount: U256::from_big_endian(&payload[1..33]),
            origin_address: read_array(payload, 33)?,
            origin_chain: u16::from_be_bytes(read_array(payload, 65)?),
            target_address: read_array(payload, 67)?,
            target_chain: u16::from_be_bytes(read_array(payload, 99)?),
            fee: U256::from_big_endian(&payload[101..133]),
        })
    }

    pub fn origin_address_hex(&self) -> String {
        hex::encode(self.origin_address)
    }

    pub fn target_address_hex(&self) -> String {
        hex::encode(self.target_address)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn encode_transfer(
        amount: u64,
        origin: [u8; 32],
        origin_chain: u16,
        target_chain: u16,
        fee: u64,
    ) -> Vec<u8> {
        let mut out = vec![TRANSFER_PAYLOAD_ID];
        let mut word = [0u8; 32];
        U256::from(amount).to_big_endian(&mut word);
        out.extend_from_slice(&word);
        out.extend_from_slice(&origin);
        out.extend_from_slice(&origin_chain.to_be_bytes());
        out.extend_from_slice(&[0x11; 32]);
        out.extend_from_slice(&target_chain.to_be_bytes());
        U256::from(fee).to_big_endian(&mut word);
        out.extend_from_slice(&word);
        out
    }

    #[test]
    fn test_parse_transfer() {
        let raw = encode_transfer(5_000, [7u8; 32], 2, 4, 25);
        let transfer = TransferPayload::parse(&raw).unwrap();
        assert_eq!(transfer.amount, U256::from(5_000));
        assert_eq!(transfer.origin_chain, 2);
        assert_eq!(transfer.target_chain, 4);
        assert_eq!(transfer.fee, U256::from(25));
        assert_eq!(transfer.origin_address, [7u8; 32]);
        assert_eq!(transfer.target_address_hex(), "11".repeat(32));
    }

    #[test]
    fn test_rejects_other_payloads() {
        let mut raw = encode_transfer(1, [0u8; 32], 2, 4, 1);
        raw[0] = 3;
        assert!(TransferPayload::parse(&raw).is_err());
        assert!(TransferPayload::parse(&[]).is_err());
        assert!(TransferPayload::parse(&[1, 0, 0]).is_err());
    }
}
