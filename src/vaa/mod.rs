//! Signed VAA decoding
//!
//! A VAA is a guardian-signed envelope around an emitter's message:
//!
//! ```text
//! header: version u8 | guardian_set_index u32 | n u8 | n * (index u8, sig [65])
//! body:   timestamp u32 | nonce u32 | emitter_chain u16 | emitter_address [32]
//!         | sequence u64 | consistency_level u8 | payload ..
//! ```
//!
//! All integers are big-endian. The body is what guardians sign, and its
//! double Keccak-256 digest is the identity redemption contracts record.

pub mod stream;
pub mod transfer;

pub use stream::{Asset, StreamInstruction, StreamPayload};
pub use transfer::TransferPayload;

use crate::error::{RelayerError, RelayerResult};

use sha3::{Digest, Keccak256};

const SIGNATURE_LEN: usize = 66;
const HEADER_LEN: usize = 6;
const BODY_FIXED_LEN: usize = 51;

/// Wormhole chain identifiers used by this relayer
pub mod chains {
    pub const SOLANA: u16 = 1;
    pub const ETHEREUM: u16 = 2;
    pub const TERRA: u16 = 3;
    pub const BSC: u16 = 4;
    pub const POLYGON: u16 = 5;
    pub const AVALANCHE: u16 = 6;
    pub const OASIS: u16 = 7;
    pub const ALGORAND: u16 = 8;
    pub const AURORA: u16 = 9;
    pub const FANTOM: u16 = 10;
    pub const KARURA: u16 = 11;
    pub const ACALA: u16 = 12;
    pub const KLAYTN: u16 = 13;
    pub const CELO: u16 = 14;

    /// Human readable name for metric labels
    pub fn name(chain_id: u16) -> String {
        match chain_id {
            SOLANA => "solana".into(),
            ETHEREUM => "ethereum".into(),
            TERRA => "terra".into(),
            BSC => "bsc".into(),
            POLYGON => "polygon".into(),
            AVALANCHE => "avalanche".into(),
            OASIS => "oasis".into(),
            ALGORAND => "algorand".into(),
            AURORA => "aurora".into(),
            FANTOM => "fantom".into(),
            KARURA => "karura".into(),
            ACALA => "acala".into(),
            KLAYTN => "klaytn".into(),
            CELO => "celo".into(),
            other => format!("chain-{}", other),
        }
    }
}

/// A parsed VAA that keeps its original bytes for resubmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedVaa {
    bytes: Vec<u8>,
    body_offset: usize,
    pub version: u8,
    pub guardian_set_index: u32,
    pub signature_count: u8,
    pub timestamp: u32,
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub consistency_level: u8,
}

impl SignedVaa {
    /// Decode a VAA from raw bytes
    pub fn parse(bytes: &[u8]) -> RelayerResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RelayerError::InvalidVaa("truncated header".into()));
        }

        let version = bytes[0];
        let guardian_set_index = u32::from_be_bytes(read_array(bytes, 1)?);
        let signature_count = bytes[5];
        let body_offset = HEADER_LEN + SIGNATURE_LEN * signature_count as usize;

        if bytes.len() < body_offset + BODY_FIXED_LEN {
            return Err(RelayerError::InvalidVaa(format!(
                "{} bytes is too short for {} signatures",
                bytes.len(),
                signature_count
            )));
        }

        let body = &bytes[body_offset..];
        Ok(Self {
            version,
            guardian_set_index,
            signature_count,
            timestamp: u32::from_be_bytes(read_array(body, 0)?),
            nonce: u32::from_be_bytes(read_array(body, 4)?),
            emitter_chain: u16::from_be_bytes(read_array(body, 8)?),
            emitter_address: read_array(body, 10)?,
            sequence: u64::from_be_bytes(read_array(body, 42)?),
            consistency_level: body[50],
            bytes: bytes.to_vec(),
            body_offset,
        })
    }

    /// Decode a hex encoded VAA, with or without a 0x prefix
    pub fn from_hex(encoded: &str) -> RelayerResult<Self> {
        let trimmed = encoded.strip_prefix("0x").unwrap_or(encoded);
        let bytes = hex::decode(trimmed)
            .map_err(|e| RelayerError::InvalidVaa(format!("bad hex: {}", e)))?;
        Self::parse(&bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[self.body_offset..]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.body_offset + BODY_FIXED_LEN..]
    }

    pub fn emitter_address_hex(&self) -> String {
        hex::encode(self.emitter_address)
    }

    /// keccak256(keccak256(body)), the hash redemption contracts key on
    pub fn digest(&self) -> [u8; 32] {
        let inner = Keccak256::digest(self.body());
        Keccak256::digest(inner).into()
    }
}

/// Copy `N` bytes starting at `offset`
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> RelayerResult<[u8; N]> {
    buf.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            RelayerError::PayloadParsing(format!("need {} bytes at offset {}", N, offset))
        })
}

/// Normalize an emitter or token address to 32-byte lowercase hex.
///
/// 20-byte EVM addresses are left-padded with zeros, 32-byte values are kept.
pub fn encode_address(address: &str) -> RelayerResult<String> {
    let address = address.trim();
    let trimmed = address.strip_prefix("0x").unwrap_or(address).to_lowercase();
    if hex::decode(&trimmed).is_err() {
        return Err(RelayerError::Config(format!("address {} is not hex", address)));
    }
    match trimmed.len() {
        40 => Ok(format!("{:0>64}", trimmed)),
        64 => Ok(trimmed),
        n => Err(RelayerError::Config(format!(
            "address {} has unexpected length {}",
            address,
            n / 2
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a VAA with a single dummy signature around `payload`
    pub(crate) fn build_vaa(emitter_chain: u16, emitter: [u8; 32], sequence: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![1u8];
        out.extend_from_slice(&3u32.to_be_bytes());
        out.push(1);
        out.push(0);
        out.extend_from_slice(&[0xab; 65]);
        out.extend_from_slice(&1_650_000_000u32.to_be_bytes());
        out.extend_from_slice(&7u32.to_be_bytes());
        out.extend_from_slice(&emitter_chain.to_be_bytes());
        out.extend_from_slice(&emitter);
        out.extend_from_slice(&sequence.to_be_bytes());
        out.push(15);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_parse_body_fields() {
        let mut emitter = [0u8; 32];
        emitter[31] = 0xbc;
        emitter[30] = 0x0a;
        let raw = build_vaa(2, emitter, 10, &[1, 2, 3]);

        let vaa = SignedVaa::parse(&raw).unwrap();
        assert_eq!(vaa.guardian_set_index, 3);
        assert_eq!(vaa.signature_count, 1);
        assert_eq!(vaa.emitter_chain, 2);
        assert_eq!(vaa.sequence, 10);
        assert_eq!(vaa.consistency_level, 15);
        assert_eq!(vaa.payload(), &[1, 2, 3]);
        assert!(vaa.emitter_address_hex().ends_with("0abc"));

        let again = SignedVaa::from_hex(&format!("0x{}", vaa.to_hex())).unwrap();
        assert_eq!(again, vaa);
    }

    #[test]
    fn test_truncated_vaa_rejected() {
        let raw = build_vaa(2, [0u8; 32], 1, &[]);
        assert!(SignedVaa::parse(&raw[..raw.len() - 1]).is_err());
        assert!(SignedVaa::parse(&[1, 0, 0]).is_err());
        assert!(SignedVaa::from_hex("zz").is_err());
        assert!(SignedVaa::from_hex(&format!("0x0x{}", hex::encode(&raw))).is_err());
    }

    #[test]
    fn test_digest_is_double_keccak_of_body() {
        let raw = build_vaa(4, [9u8; 32], 77, b"hello");
        let vaa = SignedVaa::parse(&raw).unwrap();
        let once = Keccak256::digest(vaa.body());
        let twice: [u8; 32] = Keccak256::digest(once).into();
        assert_eq!(vaa.digest(), twice);
        assert_ne!(vaa.digest(), <[u8; 32]>::from(once));
    }

    #[test]
    fn test_encode_address() {
        let evm = encode_address("0x3ee18B2214AFF97000D974cf647E7C347E8fa585").unwrap();
        assert_eq!(evm, "0000000000000000000000003ee18b2214aff97000d974cf647e7c347e8fa585");
        assert_eq!(encode_address(&evm).unwrap(), evm);
        assert!(encode_address("0x1234").is_err());
        assert!(encode_address("not-an-address").is_err());
        assert!(encode_address("0x0x3ee18B2214AFF97000D974cf647E7C347E8fa585").is_err());
    }
}
