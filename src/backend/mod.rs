//! Pluggable relay policies
//!
//! A backend decides which messages are accepted at intake and how an accepted
//! message is delivered. The queue, worker and auditor machinery is shared; a
//! backend only supplies the message-family specific pieces. Exactly one
//! backend is selected at startup.

pub mod stream;
pub mod token_bridge;

pub use stream::StreamPolicy;
pub use token_bridge::TokenBridgePolicy;

use crate::chain::{ChainRegistry, SigningKey};
use crate::config::{BackendKind, ListenerConfig, Settings};
use crate::error::{RelayerError, RelayerResult};
use crate::store::Status;
use crate::vaa::{self, SignedVaa};

use async_trait::async_trait;
use std::sync::Arc;

/// Result of one relay attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResult {
    pub status: Status,
    pub result: String,
}

impl RelayResult {
    pub fn new(status: Status, result: impl Into<String>) -> Self {
        Self {
            status,
            result: result.into(),
        }
    }

    pub fn completed(result: impl Into<String>) -> Self {
        Self::new(Status::Completed, result)
    }

    pub fn pending(result: impl Into<String>) -> Self {
        Self::new(Status::Pending, result)
    }

    pub fn error(result: impl Into<String>) -> Self {
        Self::new(Status::Error, result)
    }

    pub fn fatal(result: impl Into<String>) -> Self {
        Self::new(Status::FatalError, result)
    }

    /// Map an adapter failure to a retryable or fatal result
    pub fn from_error(err: &RelayerError) -> Self {
        if err.is_fatal() {
            Self::fatal(err.to_string())
        } else {
            Self::error(err.to_string())
        }
    }
}

/// Emitter a listener subscribes to, with a 32-byte hex address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterFilter {
    pub chain_id: u16,
    pub emitter_address: String,
}

/// Parse configured emitters into normalized filters
pub fn emitter_filters_from_config(config: &ListenerConfig) -> RelayerResult<Vec<EmitterFilter>> {
    config
        .spy_filters
        .iter()
        .map(|f| {
            Ok(EmitterFilter {
                chain_id: f.chain_id,
                emitter_address: vaa::encode_address(&f.emitter_address)?,
            })
        })
        .collect()
}

/// A validated message plus a log-friendly description of it
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub vaa: SignedVaa,
    pub summary: String,
}

/// Intake side of a backend
#[cfg_attr(test, mockall::automock)]
pub trait Listener: Send + Sync {
    /// Structural and business checks; `Err` carries the rejection reason
    fn validate(&self, raw: &[u8]) -> Result<ParsedMessage, String>;

    fn emitter_filters(&self) -> Vec<EmitterFilter>;
}

/// Delivery side of a backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Relayer: Send + Sync {
    /// Destination chain of a message
    fn target_chain_id(&self, vaa: &SignedVaa) -> RelayerResult<u16>;

    /// Whether workers must filter messages by destination
    fn routes_by_destination(&self) -> bool;

    /// Deliver a message, or with `check_only` just report whether it is delivered
    async fn relay(
        &self,
        vaa_hex: &str,
        check_only: bool,
        key: &SigningKey,
    ) -> RelayerResult<RelayResult>;
}

/// The selected backend, shared by every role of the process
#[derive(Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub listener: Arc<dyn Listener>,
    pub relayer: Arc<dyn Relayer>,
}

impl Backend {
    pub fn from_settings(settings: &Settings, chains: Arc<ChainRegistry>) -> RelayerResult<Self> {
        let filters = emitter_filters_from_config(&settings.listener)?;
        match settings.relayer.backend {
            BackendKind::TokenBridge => {
                let policy = Arc::new(TokenBridgePolicy::new(
                    filters,
                    &settings.listener.supported_tokens,
                    chains,
                )?);
                Ok(Self {
                    kind: BackendKind::TokenBridge,
                    listener: policy.clone(),
                    relayer: policy,
                })
            }
            BackendKind::Stream => {
                let target = settings
                    .stream
                    .as_ref()
                    .map(|s| s.target_chain_id)
                    .ok_or_else(|| RelayerError::Config("missing [stream] section".into()))?;
                let policy = Arc::new(StreamPolicy::new(target, filters, chains));
                Ok(Self {
                    kind: BackendKind::Stream,
                    listener: policy.clone(),
                    relayer: policy,
                })
            }
        }
    }

    /// Chains that get workers: every chain for routed backends, else the fixed target
    pub fn destination_chains(&self, settings: &Settings) -> Vec<u16> {
        match (self.kind, &settings.stream) {
            (BackendKind::Stream, Some(stream)) => vec![stream.target_chain_id],
            _ => settings
                .enabled_chains()
                .into_iter()
                .map(|(_, c)| c.chain_id)
                .collect(),
        }
    }
}
