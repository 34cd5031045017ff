//! Token streaming protocol payloads
//!
//! Layout: `kind u8 | asset u8 | target_chain u16 | [mint [32] when asset = 1] | fields..`.
//! Addresses are 32 bytes, amounts and timestamps are u64, flags are one byte.

use super::read_array;
use crate::error::{RelayerError, RelayerResult};

/// Asset a streaming instruction moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Native,
    Token { mint: [u8; 32] },
}

/// Every operation the streaming program accepts from a remote chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInstruction {
    Deposit {
        depositor: [u8; 32],
        amount: u64,
    },
    Withdraw {
        withdrawer: [u8; 32],
        amount: u64,
    },
    Stream {
        sender: [u8; 32],
        receiver: [u8; 32],
        start_time: u64,
        end_time: u64,
        amount: u64,
        can_cancel: bool,
        can_update: bool,
    },
    StreamUpdate {
        sender: [u8; 32],
        receiver: [u8; 32],
        data_account: [u8; 32],
        start_time: u64,
        end_time: u64,
        amount: u64,
    },
    PauseResume {
        sender: [u8; 32],
        receiver: [u8; 32],
        data_account: [u8; 32],
    },
    Cancel {
        sender: [u8; 32],
        receiver: [u8; 32],
        data_account: [u8; 32],
    },
    WithdrawStream {
        sender: [u8; 32],
        receiver: [u8; 32],
        data_account: [u8; 32],
    },
    InstantTransfer {
        sender: [u8; 32],
        receiver: [u8; 32],
        amount: u64,
    },
}

impl StreamInstruction {
    /// Program entrypoint invoked for this instruction
    pub fn method(&self) -> &'static str {
        match self {
            StreamInstruction::Deposit { .. } => "deposit",
            StreamInstruction::Withdraw { .. } => "withdraw",
            StreamInstruction::Stream { .. } => "create_stream",
            StreamInstruction::StreamUpdate { .. } => "update_stream",
            StreamInstruction::PauseResume { .. } => "pause_resume_stream",
            StreamInstruction::Cancel { .. } => "cancel_stream",
            StreamInstruction::WithdrawStream { .. } => "withdraw_stream",
            StreamInstruction::InstantTransfer { .. } => "instant_transfer",
        }
    }

    /// Account the instruction acts for, used in log lines
    pub fn initiator(&self) -> &[u8; 32] {
        match self {
            StreamInstruction::Deposit { depositor, .. } => depositor,
            StreamInstruction::Withdraw { withdrawer, .. } => withdrawer,
            StreamInstruction::Stream { sender, .. }
            | StreamInstruction::StreamUpdate { sender, .. }
            | StreamInstruction::PauseResume { sender, .. }
            | StreamInstruction::Cancel { sender, .. }
            | StreamInstruction::WithdrawStream { sender, .. }
            | StreamInstruction::InstantTransfer { sender, .. } => sender,
        }
    }

    pub fn amount(&self) -> Option<u64> {
        match self {
            StreamInstruction::Deposit { amount, .. }
            | StreamInstruction::Withdraw { amount, .. }
            | StreamInstruction::Stream { amount, .. }
            | StreamInstruction::StreamUpdate { amount, .. }
            | StreamInstruction::InstantTransfer { amount, .. } => Some(*amount),
            StreamInstruction::PauseResume { .. }
            | StreamInstruction::Cancel { .. }
            | StreamInstruction::WithdrawStream { .. } => None,
        }
    }
}

/// A decoded streaming payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPayload {
    pub target_chain: u16,
    pub asset: Asset,
    pub instruction: StreamInstruction,
}

impl StreamPayload {
    pub fn parse(payload: &[u8]) -> RelayerResult<Self> {
        let mut r = Reader { buf: payload, pos: 0 };
        let kind = r.u8()?;
        let asset_tag = r.u8()?;
        let target_chain = r.u16()?;

        let asset = match asset_tag {
            0 => Asset::Native,
            1 => Asset::Token { mint: r.bytes32()? },
            other => {
                return Err(RelayerError::PayloadParsing(format!(
                    "unknown asset tag {}",
                    other
                )))
            }
        };

        let instruction = match kind {
            1 => StreamInstruction::Deposit {
                depositor: r.bytes32()?,
                amount: r.u64()?,
            },
            2 => StreamInstruction::Withdraw {
                withdrawer: r.bytes32()?,
                amount: r.u64()?,
            },
            3 => StreamInstruction::Stream {
                sender: r.bytes32()?,
                receiver: r.bytes32()?,
                start_time: r.u64()?,
                end_time: r.u64()?,
                amount: r.u64()?,
                can_cancel: r.flag()?,
                can_update: r.flag()?,
            },
            4 => StreamInstruction::StreamUpdate {
                sender: r.bytes32()?,
                receiver: r.bytes32()?,
                data_account: r.bytes32()?,
                start_time: r.u64()?,
                end_time: r.u64()?,
                amount: r.u64()?,
            },
            5 => StreamInstruction::PauseResume {
                sender: r.bytes32()?,
                receiver: r.bytes32()?,
                data_account: r.bytes32()?,
            },
            6 => StreamInstruction::Cancel {
                sender: r.bytes32()?,
                receiver: r.bytes32()?,
                data_account: r.bytes32()?,
            },
            7 => StreamInstruction::WithdrawStream {
                sender: r.bytes32()?,
                receiver: r.bytes32()?,
                data_account: r.bytes32()?,
            },
            8 => StreamInstruction::InstantTransfer {
                sender: r.bytes32()?,
                receiver: r.bytes32()?,
                amount: r.u64()?,
            },
            other => {
                return Err(RelayerError::PayloadParsing(format!(
                    "unknown stream payload kind {}",
                    other
                )))
            }
        };

        if let StreamInstruction::Stream { start_time, end_time, .. }
        | StreamInstruction::StreamUpdate { start_time, end_time, .. } = &instruction
        {
            if end_time <= start_time {
                return Err(RelayerError::PayloadParsing(format!(
                    "stream ends at {} before it starts at {}",
                    end_time, start_time
                )));
            }
        }

        Ok(Self {
            target_chain,
            asset,
            instruction,
        })
    }

    /// One-line description for intake logs
    pub fn summary(&self) -> String {
        let asset = match &self.asset {
            Asset::Native => "native".to_string(),
            Asset::Token { mint } => format!("token {}", hex::encode(mint)),
        };
        let mut line = format!(
            "{} of {} by {}",
            self.instruction.method(),
            asset,
            hex::encode(self.instruction.initiator())
        );
        if let Some(amount) = self.instruction.amount() {
            line.push_str(&format!(" amount {}", amount));
        }
        line
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> RelayerResult<[u8; N]> {
        let out = read_array::<N>(self.buf, self.pos)?;
        self.pos += N;
        Ok(out)
    }

    fn u8(&mut self) -> RelayerResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn flag(&mut self) -> RelayerResult<bool> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> RelayerResult<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn u64(&mut self) -> RelayerResult<u64> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    fn bytes32(&mut self) -> RelayerResult<[u8; 32]> {
        self.take()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn encode_deposit(asset: Asset, target_chain: u16, amount: u64) -> Vec<u8> {
        let mut out = vec![1u8];
        match asset {
            Asset::Native => {
                out.push(0);
                out.extend_from_slice(&target_chain.to_be_bytes());
            }
            Asset::Token { mint } => {
                out.push(1);
                out.extend_from_slice(&target_chain.to_be_bytes());
                out.extend_from_slice(&mint);
            }
        }
        out.extend_from_slice(&[0x21; 32]);
        out.extend_from_slice(&amount.to_be_bytes());
        out
    }

    #[test]
    fn test_parse_token_deposit() {
        let raw = encode_deposit(Asset::Token { mint: [5u8; 32] }, 1, 900);
        let parsed = StreamPayload::parse(&raw).unwrap();
        assert_eq!(parsed.target_chain, 1);
        assert_eq!(parsed.asset, Asset::Token { mint: [5u8; 32] });
        assert_eq!(
            parsed.instruction,
            StreamInstruction::Deposit {
                depositor: [0x21; 32],
                amount: 900
            }
        );
        assert!(parsed.summary().starts_with("deposit of token 0505"));
    }

    #[test]
    fn test_parse_stream_with_flags() {
        let mut raw = vec![3u8, 0, 0, 1];
        raw.extend_from_slice(&[1u8; 32]);
        raw.extend_from_slice(&[2u8; 32]);
        raw.extend_from_slice(&100u64.to_be_bytes());
        raw.extend_from_slice(&200u64.to_be_bytes());
        raw.extend_from_slice(&50u64.to_be_bytes());
        raw.extend_from_slice(&[1, 0]);

        let parsed = StreamPayload::parse(&raw).unwrap();
        assert_eq!(parsed.asset, Asset::Native);
        match parsed.instruction {
            StreamInstruction::Stream {
                start_time,
                end_time,
                can_cancel,
                can_update,
                ..
            } => {
                assert_eq!((start_time, end_time), (100, 200));
                assert!(can_cancel);
                assert!(!can_update);
            }
            other => panic!("unexpected instruction {:?}", other),
        }
    }

    #[test]
    fn test_rejects_inverted_stream_window() {
        let mut raw = vec![3u8, 0, 0, 1];
        raw.extend_from_slice(&[1u8; 64]);
        raw.extend_from_slice(&200u64.to_be_bytes());
        raw.extend_from_slice(&100u64.to_be_bytes());
        raw.extend_from_slice(&50u64.to_be_bytes());
        raw.extend_from_slice(&[0, 0]);
        assert!(StreamPayload::parse(&raw).is_err());
    }

    #[test]
    fn test_rejects_unknown_kind_and_truncation() {
        let mut raw = encode_deposit(Asset::Native, 1, 1);
        raw[0] = 42;
        assert!(StreamPayload::parse(&raw).is_err());

        let raw = encode_deposit(Asset::Native, 1, 1);
        assert!(StreamPayload::parse(&raw[..raw.len() - 3]).is_err());

        let mut raw = encode_deposit(Asset::Native, 1, 1);
        raw[1] = 9;
        assert!(StreamPayload::parse(&raw).is_err());
    }
}
