use crate::price::{get_steam_fees_object, Amount};
use crate::schema::Currency;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_DB_URL: &str = "sqlite://sales.sqlite";
const DEFAULT_DEBUG_DB_URL: &str = "sqlite://sales_debug.sqlite";
const DEFAULT_SELL_TIMEOUT: u64 = 300;
/// Relative to the workspace root.
const DEFAULT_API_RESPONSES_DIR: &str = "steam/api_responses";

/// Target for one tracked item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemToSell {
    pub quantity: usize,
    /// Cents, or a display price such as `"1,75€"`.
    pub min_price: Amount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_debug")]
    pub debug: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub steam_id: Option<String>,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    db_url: Option<String>,
    /// Seconds between two reconciliation passes.
    #[serde(default = "default_sell_timeout")]
    pub market_sell_timeout: u64,
    #[serde(default)]
    pub heartbeat_interval: Option<u64>,
    #[serde(default = "default_api_responses_dir")]
    pub api_responses_dir: PathBuf,
    #[serde(default)]
    pub items_to_sell: BTreeMap<String, ItemToSell>,
}

fn default_debug() -> bool {
    true
}

fn default_sell_timeout() -> u64 {
    DEFAULT_SELL_TIMEOUT
}

fn default_api_responses_dir() -> PathBuf {
    PathBuf::from(DEFAULT_API_RESPONSES_DIR)
}

impl Config {
    /// Reads the file named by `CONFIG_PATH`, `config.json` by default.
    pub fn from_env() -> Result<Self> {
        Self::load(common::env_or("CONFIG_PATH", DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.debug && self.steam_id.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::Config("steam_id is required outside debug mode".into()));
        }

        if self.market_sell_timeout == 0 {
            return Err(Error::Config("market_sell_timeout must be positive".into()));
        }

        if self.heartbeat_interval == Some(0) {
            return Err(Error::Config("heartbeat_interval must be positive".into()));
        }

        for (name, item) in &self.items_to_sell {
            get_steam_fees_object(item.min_price)
                .map_err(|e| Error::Config(format!("min_price for {name}: {e}")))?;
        }

        Ok(())
    }

    pub fn db_url(&self) -> &str {
        match &self.db_url {
            Some(url) => url,
            None if self.debug => DEFAULT_DEBUG_DB_URL,
            None => DEFAULT_DB_URL,
        }
    }

    pub fn sell_interval(&self) -> Duration {
        Duration::from_secs(self.market_sell_timeout)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_interval.map(Duration::from_secs)
    }
}
