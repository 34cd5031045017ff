//! Configuration management for the spy relayer
//!
//! Loads configuration from TOML files with environment variable substitution.
//! The resulting [`Settings`] value is immutable and handed to each component
//! at construction time.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub redis: RedisConfig,
    pub listener: ListenerConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub monitor: MonitorConfig,
    pub stream: Option<StreamConfig>,
    pub chains: HashMap<String, ChainConfig>,
}

/// Which message family this process relays
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    TokenBridge,
    Stream,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub backend: BackendKind,
    /// Idle sleep between worker sweeps
    pub worker_interval_ms: u64,
    /// Cooldown before a failed worker is restarted
    pub worker_restart_ms: u64,
    /// Cooldown before a failed auditor is restarted
    pub auditor_restart_ms: u64,
    pub audit_interval_ms: u64,
    /// Minimum age of a WORKING record before the auditor acts on it
    pub audit_age_secs: u64,
    /// Age after which a Pending/Error record in WORKING is reclaimed
    pub stuck_claim_age_secs: u64,
    /// Upper bound on one relay attempt; must stay below `stuck_claim_age_secs`
    #[serde(default = "default_relay_timeout_secs")]
    pub relay_timeout_secs: u64,
    /// Delay before retrying a failed store connection
    pub store_retry_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub clear_on_init: bool,
    #[serde(default)]
    pub demote_working_on_init: bool,
}

impl RelayerConfig {
    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }

    pub fn worker_restart(&self) -> Duration {
        Duration::from_millis(self.worker_restart_ms)
    }

    pub fn auditor_restart(&self) -> Duration {
        Duration::from_millis(self.auditor_restart_ms)
    }

    pub fn audit_interval(&self) -> Duration {
        Duration::from_millis(self.audit_interval_ms)
    }

    pub fn store_retry(&self) -> Duration {
        Duration::from_millis(self.store_retry_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}

fn default_relay_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    /// Connection URL selecting the given logical database
    pub fn url(&self, db: u8) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, db)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Emitters this relayer accepts messages from
    #[serde(default)]
    pub spy_filters: Vec<EmitterConfig>,
    /// Origin tokens the token bridge backend will relay
    #[serde(default)]
    pub supported_tokens: Vec<SupportedToken>,
    pub backlog_drain_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmitterConfig {
    pub chain_id: u16,
    pub emitter_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupportedToken {
    pub chain_id: u16,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub queue_interval_secs: u64,
    pub wallet_interval_secs: u64,
}

/// Streaming backend relays every message to one fixed chain
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub target_chain_id: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u16,
    pub name: String,
    pub family: ChainFamily,
    pub rpc_urls: Vec<String>,
    /// Contract that redeems relayed messages on this chain
    pub bridge_address: String,
    /// Wrapped native asset, 32-byte hex as it appears in transfer payloads
    pub wrapped_native_asset: Option<String>,
    pub gas_price_strategy: GasPriceStrategy,
    /// Percentage applied to estimated fees (100 = unchanged)
    #[serde(default = "default_fee_multiplier")]
    pub fee_multiplier_percent: u64,
    pub max_gas_price_gwei: u64,
    #[serde(default)]
    pub private_keys: Vec<String>,
    pub enabled: bool,
}

fn default_fee_multiplier() -> u64 {
    100
}

impl ChainConfig {
    /// Configured signing keys, skipping entries left empty by substitution
    pub fn signing_keys(&self) -> Vec<&str> {
        self.private_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    /// Let the provider fill fees
    Auto,
    /// Force a legacy gas price
    Legacy,
    /// EIP-1559 fees estimated from the latest base fee
    Eip1559,
}

impl Settings {
    /// Load settings from the given configuration file
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.bridge_address.is_empty() {
                anyhow::bail!("Chain {} has no bridge address configured", name);
            }
            if chain.signing_keys().is_empty() {
                tracing::warn!("Chain {} has no signing keys - no workers will run", name);
            }
        }

        let r = &self.relayer;
        if r.backoff_base_ms == 0 || r.backoff_max_ms < r.backoff_base_ms {
            anyhow::bail!("Backoff must satisfy 0 < backoff_base_ms <= backoff_max_ms");
        }
        if r.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if r.relay_timeout_secs == 0 || r.relay_timeout_secs >= r.stuck_claim_age_secs {
            anyhow::bail!("relay_timeout_secs must be non-zero and below stuck_claim_age_secs");
        }

        if r.backend == BackendKind::Stream {
            let Some(stream) = &self.stream else {
                anyhow::bail!("Stream backend requires a [stream] section");
            };
            if self.get_chain_by_id(stream.target_chain_id).is_none() {
                anyhow::bail!(
                    "Stream target chain {} is not an enabled chain",
                    stream.target_chain_id
                );
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        let mut chains: Vec<_> = self.chains.iter().filter(|(_, c)| c.enabled).collect();
        chains.sort_by_key(|(_, c)| c.chain_id);
        chains
    }

    /// Get enabled chain config by wormhole chain ID
    pub fn get_chain_by_id(&self, chain_id: u16) -> Option<&ChainConfig> {
        self.chains
            .values()
            .find(|c| c.enabled && c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
