//! # Relayer CLI

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Relays signed cross-chain messages from a Redis backed queue.
#[derive(Debug, Parser)]
#[command(author, version, about = "Spy relayer", long_about = None)]
#[command(group(ArgGroup::new("mode").multiple(false).args(["listen_only", "relay_only", "wallet_monitor_only"])))]
pub struct Args {
    /// The configuration file.
    #[arg(long, value_name = "CONFIG", env = "SPY_RELAYER_CONFIG", default_value = "config/default.toml")]
    pub config: PathBuf,
    /// Only accept and queue messages.
    #[arg(long = "listen_only")]
    pub listen_only: bool,
    /// Only run relay workers and auditors.
    #[arg(long = "relay_only")]
    pub relay_only: bool,
    /// Only publish wallet balances.
    #[arg(long = "wallet_monitor_only")]
    pub wallet_monitor_only: bool,
}

/// Which roles this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roles {
    pub listen: bool,
    pub relay: bool,
    pub wallet_monitor: bool,
}

impl Roles {
    /// Roles that talk to the queue store
    pub fn needs_store(&self) -> bool {
        self.listen || self.relay
    }

    /// Roles allowed to apply `clear_on_init` / `demote_working_on_init`.
    /// Only relay processes own the claims in `WORKING`.
    pub fn prepares_tables(&self) -> bool {
        self.relay
    }
}

impl Args {
    pub fn roles(&self) -> Roles {
        if self.listen_only {
            Roles {
                listen: true,
                relay: false,
                wallet_monitor: false,
            }
        } else if self.relay_only {
            Roles {
                listen: false,
                relay: true,
                wallet_monitor: false,
            }
        } else if self.wallet_monitor_only {
            Roles {
                listen: false,
                relay: false,
                wallet_monitor: true,
            }
        } else {
            Roles {
                listen: true,
                relay: true,
                wallet_monitor: true,
            }
        }
    }
}
