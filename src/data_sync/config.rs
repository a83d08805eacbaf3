use crate::utils::config_loader::{LoadConfigError, load_from_file};
use crate::utils::constants::{BPS_DENOMINATOR, DEFAULT_DEADLINE_SECS, DEFAULT_SLIPPAGE_BPS};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Configuration for the pool mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// WebSocket RPC URL for the log subscription
    pub rpc_wss_url: String,
    /// HTTP RPC URL for direct reads
    pub rpc_http_url: String,
    /// Timeout for HTTP requests in seconds
    pub http_timeout_secs: u64,
    /// Router directory contract
    pub portal_address: String,
    /// Shared price oracle contract
    pub oracle_address: String,
    /// WebSocket connection timeout in seconds
    pub ws_connection_timeout_secs: u64,
    /// Maximum number of consecutive reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Delay between reconnection attempts in seconds
    pub reconnect_delay_secs: u64,
    /// Number of per-pool ordered ingestion workers
    pub ingest_shards: usize,
    /// Buffer size of the event channels
    pub channel_buffer_size: usize,
    /// Price sampling interval in milliseconds, normally the chain block time
    pub price_interval_ms: u64,
    /// Timeout of a single oracle request in milliseconds
    pub price_timeout_ms: u64,
    pub default_slippage_bps: u64,
    pub deadline_secs: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            rpc_wss_url: "wss://rpc.mantle.xyz".to_string(),
            rpc_http_url: "https://rpc.mantle.xyz".to_string(),
            http_timeout_secs: 10,
            portal_address: Address::ZERO.to_string(),
            oracle_address: Address::ZERO.to_string(),
            ws_connection_timeout_secs: 30,
            max_reconnect_attempts: 5,
            reconnect_delay_secs: 2,
            ingest_shards: 4,
            channel_buffer_size: 1024,
            price_interval_ms: 2_000,
            price_timeout_ms: 1_500,
            default_slippage_bps: DEFAULT_SLIPPAGE_BPS,
            deadline_secs: DEFAULT_DEADLINE_SECS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> eyre::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map(Some).map_err(|e| eyre::eyre!("Invalid {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

impl MirrorConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();

        if let Ok(rpc_wss_url) = std::env::var("RPC_WSS_URL") {
            let _url = Url::parse(&rpc_wss_url).map_err(|e| eyre::eyre!("Invalid RPC_WSS_URL: {}", e))?;
            config.rpc_wss_url = rpc_wss_url;
        }

        if let Ok(rpc_http_url) = std::env::var("RPC_HTTP_URL") {
            let _url = Url::parse(&rpc_http_url).map_err(|e| eyre::eyre!("Invalid RPC_HTTP_URL: {}", e))?;
            config.rpc_http_url = rpc_http_url;
        }

        if let Ok(portal_address) = std::env::var("PORTAL_ADDRESS") {
            config.portal_address = portal_address;
        }

        if let Ok(oracle_address) = std::env::var("ORACLE_ADDRESS") {
            config.oracle_address = oracle_address;
        }

        if let Some(value) = env_parse("HTTP_TIMEOUT_SECS")? {
            config.http_timeout_secs = value;
        }
        if let Some(value) = env_parse("WS_CONNECTION_TIMEOUT_SECS")? {
            config.ws_connection_timeout_secs = value;
        }
        if let Some(value) = env_parse("MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = value;
        }
        if let Some(value) = env_parse("RECONNECT_DELAY_SECS")? {
            config.reconnect_delay_secs = value;
        }
        if let Some(value) = env_parse("INGEST_SHARDS")? {
            config.ingest_shards = value;
        }
        if let Some(value) = env_parse("CHANNEL_BUFFER_SIZE")? {
            config.channel_buffer_size = value;
        }
        if let Some(value) = env_parse("PRICE_INTERVAL_MS")? {
            config.price_interval_ms = value;
        }
        if let Some(value) = env_parse("PRICE_TIMEOUT_MS")? {
            config.price_timeout_ms = value;
        }
        if let Some(value) = env_parse("DEFAULT_SLIPPAGE_BPS")? {
            config.default_slippage_bps = value;
        }
        if let Some(value) = env_parse("DEADLINE_SECS")? {
            config.deadline_secs = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing keys keep their defaults.
    pub async fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let config: Self = load_from_file(path).await?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoadConfigError> {
        let invalid = |msg: String| Err(LoadConfigError::ConfigError(msg));

        for (name, url) in [("rpc_wss_url", &self.rpc_wss_url), ("rpc_http_url", &self.rpc_http_url)] {
            if let Err(e) = Url::parse(url) {
                return invalid(format!("{} is not a valid URL: {}", name, e));
            }
        }
        for (name, address) in [("portal_address", &self.portal_address), ("oracle_address", &self.oracle_address)] {
            if let Err(e) = address.parse::<Address>() {
                return invalid(format!("{} is not a valid address: {}", name, e));
            }
        }
        if self.ingest_shards == 0 {
            return invalid("ingest_shards must be at least 1".to_string());
        }
        if self.channel_buffer_size == 0 {
            return invalid("channel_buffer_size must be at least 1".to_string());
        }
        if self.price_interval_ms == 0 {
            return invalid("price_interval_ms must be positive".to_string());
        }
        if self.default_slippage_bps > BPS_DENOMINATOR {
            return invalid(format!("default_slippage_bps {} exceeds {}", self.default_slippage_bps, BPS_DENOMINATOR));
        }
        Ok(())
    }

    pub fn portal_address(&self) -> eyre::Result<Address> {
        self.portal_address.parse().map_err(|e| eyre::eyre!("Invalid portal address: {}", e))
    }

    pub fn oracle_address(&self) -> eyre::Result<Address> {
        self.oracle_address.parse().map_err(|e| eyre::eyre!("Invalid oracle address: {}", e))
    }

    pub fn ws_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_connection_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn price_interval(&self) -> Duration {
        Duration::from_millis(self.price_interval_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }
}
