//! Two-table key/value queue store
//!
//! `INCOMING` holds records waiting for a worker, `WORKING` holds records a
//! worker has claimed and, once finished, their terminal status until the
//! auditor retires them. Table membership is the claim state; records carry
//! no lock of their own.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::{RelayerError, RelayerResult};
use crate::vaa::SignedVaa;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical table, mapped to a Redis database index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Incoming,
    Working,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::Incoming, Table::Working];

    pub fn db(self) -> u8 {
        match self {
            Table::Incoming => 0,
            Table::Working => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Table::Incoming => "incoming",
            Table::Working => "working",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw access to the two tables
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn get(&self, table: Table, key: &str) -> RelayerResult<Option<String>>;

    async fn set(&self, table: Table, key: &str, value: &str) -> RelayerResult<()>;

    /// Delete a key, reporting whether it existed
    async fn del(&self, table: Table, key: &str) -> RelayerResult<bool>;

    /// Every key currently in the table
    async fn keys(&self, table: Table) -> RelayerResult<Vec<String>>;

    /// Remove every key in the table
    async fn clear(&self, table: Table) -> RelayerResult<()>;

    async fn ping(&self) -> RelayerResult<()>;
}

/// Identity of one observed message. Its JSON form is the store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    pub chain_id: u16,
    pub emitter_address: String,
    pub sequence: u64,
}

impl StoreKey {
    pub fn from_vaa(vaa: &SignedVaa) -> Self {
        Self {
            chain_id: vaa.emitter_chain,
            emitter_address: vaa.emitter_address_hex(),
            sequence: vaa.sequence,
        }
    }

    pub fn to_json(&self) -> RelayerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> RelayerResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.chain_id, self.emitter_address, self.sequence)
    }
}

/// Relay status, stored as its numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Completed,
    Error,
    FatalError,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Pending => 1,
            Status::Completed => 2,
            Status::Error => 3,
            Status::FatalError => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Status::Pending),
            2 => Some(Status::Completed),
            3 => Some(Status::Error),
            4 => Some(Status::FatalError),
            _ => None,
        }
    }

    /// Terminal records stay in WORKING until the auditor retires them
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::FatalError)
    }
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(d)?;
        Status::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status code {}", code)))
    }
}

/// Queue record stored under a [`StoreKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePayload {
    pub vaa_bytes: String,
    pub status: Status,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
}

impl StorePayload {
    pub fn new(vaa_hex: String, now: DateTime<Utc>) -> Self {
        Self {
            vaa_bytes: vaa_hex,
            status: Status::Pending,
            timestamp: now,
            retries: 0,
        }
    }

    /// Fresh Pending record for the same message
    pub fn reset(self, now: DateTime<Utc>) -> Self {
        Self::new(self.vaa_bytes, now)
    }

    pub fn to_json(&self) -> RelayerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> RelayerResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| RelayerError::Store(format!("corrupt queue record: {}", e)))
    }
}

mod iso_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
