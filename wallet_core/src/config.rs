//! Client configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::WalletError;
use crate::mining::MiningConfig;

/// Configuration for a wallet client.
///
/// Can be loaded from a TOML file via [`ClientConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the ledger authority.
    #[serde(default = "default_authority_url")]
    pub authority_url: String,

    /// Timeout for ordinary requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Timeout for the mining request. The authority may hold it open until
    /// a block is found.
    #[serde(default = "default_mining_timeout_secs")]
    pub mining_timeout_secs: u64,

    /// Balance and chain refresh period, in seconds.
    #[serde(default = "default_balance_refresh_secs")]
    pub balance_refresh_secs: u64,

    /// Mempool refresh period, in seconds.
    #[serde(default = "default_mempool_refresh_secs")]
    pub mempool_refresh_secs: u64,

    /// Mining progress poll period, in milliseconds.
    #[serde(default = "default_mining_poll_millis")]
    pub mining_poll_millis: u64,

    /// Consecutive failed progress polls before a job is failed locally.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,

    /// Location of the local wallet store.
    #[serde(default = "default_wallet_store")]
    pub wallet_store: PathBuf,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_authority_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_mining_timeout_secs() -> u64 {
    600
}

fn default_balance_refresh_secs() -> u64 {
    10
}

fn default_mempool_refresh_secs() -> u64 {
    5
}

fn default_mining_poll_millis() -> u64 {
    1000
}

fn default_max_poll_failures() -> u32 {
    1
}

fn default_wallet_store() -> PathBuf {
    PathBuf::from("./tessera_wallets.json")
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, WalletError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| WalletError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, WalletError> {
        let config: Self = toml::from_str(s).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, WalletError> {
        toml::to_string_pretty(self).map_err(|e| WalletError::Config(e.to_string()))
    }

    /// Reject values that would stall the refresh loops.
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.authority_url.trim().is_empty() {
            return Err(WalletError::Config("authority_url must not be empty".into()));
        }
        for (name, value) in [
            ("balance_refresh_secs", self.balance_refresh_secs),
            ("mempool_refresh_secs", self.mempool_refresh_secs),
            ("mining_poll_millis", self.mining_poll_millis),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(WalletError::Config(format!("{name} must be positive")));
            }
        }
        if self.max_poll_failures == 0 {
            return Err(WalletError::Config("max_poll_failures must be at least 1".into()));
        }
        Ok(())
    }

    pub fn balance_refresh(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_secs)
    }

    pub fn mempool_refresh(&self) -> Duration {
        Duration::from_secs(self.mempool_refresh_secs)
    }

    pub fn mining(&self) -> MiningConfig {
        MiningConfig {
            poll_interval: Duration::from_millis(self.mining_poll_millis),
            max_poll_failures: self.max_poll_failures,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            authority_url: default_authority_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            mining_timeout_secs: default_mining_timeout_secs(),
            balance_refresh_secs: default_balance_refresh_secs(),
            mempool_refresh_secs: default_mempool_refresh_secs(),
            mining_poll_millis: default_mining_poll_millis(),
            max_poll_failures: default_max_poll_failures(),
            wallet_store: default_wallet_store(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
