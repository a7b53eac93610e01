use crate::core::{
    FeeRate, COINBASE_MATURITY, DEFAULT_INCREMENTAL_RELAY_FEE_RATE, DEFAULT_MAX_TX_FEE,
    DEFAULT_MIN_BUMP_FEE_DELTA, DEFAULT_MIN_RELAY_FEE_RATE, DEFAULT_WALLET_FEE_RATE,
    DUST_THRESHOLD,
};
use crate::error::{Result, WalletError};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 5_000;

const DATA_DIR_KEY: &str = "WALLET_DATA_DIR";
const MIN_RELAY_FEE_KEY: &str = "WALLET_MIN_RELAY_FEE";
const MIN_BUMP_DELTA_KEY: &str = "WALLET_MIN_BUMP_DELTA";
const BROADCAST_KEY: &str = "WALLET_BROADCAST";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub data_dir: PathBuf,
    /// sat/kvB
    pub min_relay_fee_rate: u64,
    /// sat/kvB a replacement pays on top of the fees it evicts
    pub incremental_relay_fee_rate: u64,
    /// Smallest absolute fee increase a bump will produce (sat)
    pub min_bump_fee_delta: u64,
    /// sat/kvB used when the caller does not pick a rate
    pub default_fee_rate: u64,
    pub max_tx_fee: u64,
    pub coinbase_maturity: u32,
    /// Allow spending unconfirmed outputs of our own transactions
    pub spend_zero_conf_change: bool,
    pub broadcast_transactions: bool,
    pub submit_timeout_ms: u64,
    pub dust_threshold: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            data_dir: PathBuf::from("data").join("wallet"),
            min_relay_fee_rate: DEFAULT_MIN_RELAY_FEE_RATE,
            incremental_relay_fee_rate: DEFAULT_INCREMENTAL_RELAY_FEE_RATE,
            min_bump_fee_delta: DEFAULT_MIN_BUMP_FEE_DELTA,
            default_fee_rate: DEFAULT_WALLET_FEE_RATE,
            max_tx_fee: DEFAULT_MAX_TX_FEE,
            coinbase_maturity: COINBASE_MATURITY,
            spend_zero_conf_change: true,
            broadcast_transactions: true,
            submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT_MS,
            dust_threshold: DUST_THRESHOLD,
        }
    }
}

impl WalletConfig {
    /// Read a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<WalletConfig> {
        let contents = fs::read_to_string(path)?;
        let config: WalletConfig = toml::from_str(&contents)?;
        info!("Loaded wallet configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults, then the file if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<WalletConfig> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => WalletConfig::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(rate) = env::var(MIN_RELAY_FEE_KEY) {
            self.min_relay_fee_rate = parse_env(MIN_RELAY_FEE_KEY, &rate)?;
        }
        if let Ok(delta) = env::var(MIN_BUMP_DELTA_KEY) {
            self.min_bump_fee_delta = parse_env(MIN_BUMP_DELTA_KEY, &delta)?;
        }
        if let Ok(flag) = env::var(BROADCAST_KEY) {
            self.broadcast_transactions = parse_env(BROADCAST_KEY, &flag)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_relay_fee_rate == 0 {
            return Err(WalletError::Config(
                "min_relay_fee_rate must be positive".to_string(),
            ));
        }
        if self.incremental_relay_fee_rate == 0 {
            return Err(WalletError::Config(
                "incremental_relay_fee_rate must be positive".to_string(),
            ));
        }
        if self.default_fee_rate < self.min_relay_fee_rate {
            return Err(WalletError::Config(format!(
                "default_fee_rate {} is below min_relay_fee_rate {}",
                self.default_fee_rate, self.min_relay_fee_rate
            )));
        }
        if self.coinbase_maturity == 0 {
            return Err(WalletError::Config(
                "coinbase_maturity must be positive".to_string(),
            ));
        }
        if self.submit_timeout_ms == 0 {
            return Err(WalletError::Config(
                "submit_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn min_relay_fee(&self) -> FeeRate {
        FeeRate::from_sat_per_kvb(self.min_relay_fee_rate)
    }

    pub fn incremental_relay_fee(&self) -> FeeRate {
        FeeRate::from_sat_per_kvb(self.incremental_relay_fee_rate)
    }

    pub fn default_fee(&self) -> FeeRate {
        FeeRate::from_sat_per_kvb(self.default_fee_rate)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| WalletError::Config(format!("Invalid value for {key}: {value}")))
}
