//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{CartError, Result};
use crate::gateway::Contracts;
use crate::types::Address;

/// USDC on Base mainnet.
const DEFAULT_TOKEN_ADDRESS: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base JSON-RPC endpoint
    pub rpc_url: String,
    /// BasedCartFactory contract
    pub factory_address: Address,
    /// ERC-20 token carts are funded in
    pub token_address: Address,
    /// Account this process acts for. The node must be able to sign for it.
    pub viewer_address: Address,
    pub chain_id: u64,
    /// Port for the REST API server
    pub api_port: u16,
    /// How long to wait for a transaction to be included
    pub confirmation_timeout_secs: u64,
    /// Delay between `eth_getTransactionReceipt` polls
    pub receipt_poll_interval_ms: u64,
    /// Per-request timeout of the HTTP client
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "https://mainnet.base.org".to_string()),
            factory_address: required("FACTORY_ADDRESS")?,
            token_address: parsed("TOKEN_ADDRESS", DEFAULT_TOKEN_ADDRESS)?,
            viewer_address: required("VIEWER_ADDRESS")?,
            chain_id: parsed("CHAIN_ID", "8453")?,
            api_port: parsed("API_PORT", "3001")?,
            confirmation_timeout_secs: parsed("CONFIRMATION_TIMEOUT_SECS", "120")?,
            receipt_poll_interval_ms: parsed("RECEIPT_POLL_INTERVAL_MS", "2000")?,
            http_timeout_secs: parsed("HTTP_TIMEOUT_SECS", "30")?,
        })
    }

    pub fn contracts(&self) -> Contracts {
        Contracts {
            factory: self.factory_address,
            token: self.token_address,
        }
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CartError::Config(format!("Missing env var: {key}")))
}

fn required<T: FromStr>(key: &str) -> Result<T> {
    let raw = env_var(key)
        .map_err(|_| CartError::Config(format!("{key} environment variable is required")))?;
    raw.parse()
        .map_err(|_| CartError::Config(format!("Invalid {key}")))
}

fn parsed<T: FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| CartError::Config(format!("Invalid {key}")))
}
