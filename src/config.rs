use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::transfer::state::Direction;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL URL for the transfer store and reconcile lock.
    /// Absent: in-memory store and lock (single process only).
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub rail: RailConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

/// State machine policy: retries, cooldown, limits, fees
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_retries: i32,
    pub poll_cooldown_secs: u64,
    pub batch_size: usize,
    pub token_ttl_secs: u64,
    /// Sandbox adapters are refused in production
    pub production: bool,
    pub limits: LimitsConfig,
    pub fees: FeeConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            poll_cooldown_secs: 120,
            batch_size: 20,
            token_ttl_secs: 600,
            production: false,
            limits: LimitsConfig::default(),
            fees: FeeConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.poll_cooldown_secs as i64)
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs as i64)
    }
}

/// Per-direction amount bounds in USD (inclusive)
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub cash_out_min: Decimal,
    pub cash_out_max: Decimal,
    pub cash_in_min: Decimal,
    pub cash_in_max: Decimal,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            cash_out_min: Decimal::new(5, 0),
            cash_out_max: Decimal::new(2500, 0),
            cash_in_min: Decimal::new(5, 0),
            cash_in_max: Decimal::new(950, 0),
        }
    }
}

impl LimitsConfig {
    pub fn bounds(&self, direction: Direction) -> (Decimal, Decimal) {
        match direction {
            Direction::CashOut => (self.cash_out_min, self.cash_out_max),
            Direction::CashIn => (self.cash_in_min, self.cash_in_max),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeeConfig {
    /// Rail fee estimate as a percentage of the amount
    pub rail_fee_percent: Decimal,
    /// Rail processing time added to the bridge ETA
    pub rail_buffer_secs: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            rail_fee_percent: Decimal::new(3, 0),
            rail_buffer_secs: 600,
        }
    }
}

/// Reconcile loop scheduling and lock lease
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub tick_interval_secs: u64,
    /// Must comfortably exceed one pass
    pub lock_lease_secs: u64,
    pub lock_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 300,
            lock_lease_secs: 240,
            lock_name: "cash-rail-reconcile".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterMode {
    #[default]
    Sandbox,
    Live,
}

/// SEP-10 / SEP-24 anchor
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RailConfig {
    pub mode: AdapterMode,
    pub auth_url: String,
    pub sep24_url: String,
    pub network_passphrase: String,
    pub asset_code: String,
    /// Secret seed (S...) used to sign SEP-10 challenges
    pub auth_secret: Option<String>,
    /// Secret seed (S...) of the account holding settlement funds
    pub funds_secret: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            mode: AdapterMode::Sandbox,
            auth_url: "https://extstellar.moneygram.com/stellaradapterservice/auth".to_string(),
            sep24_url: "https://extstellar.moneygram.com/stellaradapterservice/sep24".to_string(),
            network_passphrase: "Test SDF Network ; September 2015".to_string(),
            asset_code: "USDC".to_string(),
            auth_secret: None,
            funds_secret: None,
            request_timeout_secs: 30,
        }
    }
}

/// Allbridge-style bridge REST API
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub mode: AdapterMode,
    pub base_url: String,
    pub custody_chain: String,
    pub settlement_chain: String,
    pub token: String,
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: AdapterMode::Sandbox,
            base_url: "https://core.api.allbridgecoreapi.net".to_string(),
            custody_chain: "SOL".to_string(),
            settlement_chain: "STLR".to_string(),
            token: "USDC".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Horizon payment submission
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementConfig {
    pub mode: AdapterMode,
    pub horizon_url: String,
    pub network_passphrase: String,
    pub asset_code: String,
    pub asset_issuer: String,
    /// Falls back to `rail.funds_secret` when unset
    pub funds_secret: Option<String>,
    /// Per-operation fee in stroops
    pub base_fee: u32,
    pub tx_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            mode: AdapterMode::Sandbox,
            horizon_url: "https://horizon-testnet.stellar.org".to_string(),
            network_passphrase: "Test SDF Network ; September 2015".to_string(),
            asset_code: "USDC".to_string(),
            asset_issuer: "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5".to_string(),
            funds_secret: None,
            base_fee: 10_000,
            tx_timeout_secs: 300,
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml` and apply secret overrides from the environment
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Secrets never need to live in YAML
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("RAIL_AUTH_SECRET") {
            self.rail.auth_secret = Some(secret);
        }
        if let Some(secret) = lookup("RAIL_FUNDS_SECRET") {
            self.rail.funds_secret = Some(secret);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.postgres_url = Some(url);
        }
        if self.settlement.funds_secret.is_none() {
            self.settlement.funds_secret = self.rail.funds_secret.clone();
        }
    }
}
