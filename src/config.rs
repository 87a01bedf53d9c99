//! Bots configuration file model.
//!
//! One JSON file describes every bot. Shorthand string forms (`"N%"`,
//! `"Nx"`, `"pool"`, `"market"`) are accepted where noted; a prefixed
//! environment overlay can override scalar settings.

use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use crate::errors::{BotError, BotResult};
use crate::grid::types::Sides;
use crate::parse::{BoundSpec, FundsSpec, PriceMode, PriceSpec};

/// The whole bots file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotsFile {
    pub bots: Vec<BotConfig>,
    /// Single log level setting: debug | info | warn | error.
    #[serde(default)]
    pub log_level: Option<String>,
    /// Directory for persisted snapshots. Defaults to the working directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl BotsFile {
    /// Load from a JSON file with a `DEXGRID`-prefixed environment overlay.
    pub fn load(path: impl AsRef<Path>) -> BotResult<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("DEXGRID").separator("__"))
            .build()
            .map_err(|e| BotError::Config(e.to_string()))?;
        let file: BotsFile = settings
            .try_deserialize()
            .map_err(|e| BotError::Config(e.to_string()))?;
        Ok(file)
    }

    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Bots that should actually run.
    pub fn active_bots(&self) -> impl Iterator<Item = &BotConfig> {
        self.bots.iter().filter(|b| b.active)
    }
}

/// Configuration of one bot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub name: String,
    pub asset_a: String,
    pub asset_b: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Suppress chain mutations, log what would have been sent.
    #[serde(default)]
    pub dry_run: bool,

    /// Reference price, or where to derive it; absent means `priceMode`
    /// decides.
    #[serde(default)]
    pub market_price: Option<PriceSpec>,
    pub min_price: BoundSpec,
    pub max_price: BoundSpec,
    pub increment_percent: f64,
    pub target_spread_percent: f64,

    #[serde(default = "default_weights")]
    pub weight_distribution: Sides<f64>,
    pub bot_funds: Sides<FundsSpec>,
    pub active_orders: Sides<u32>,

    pub preferred_account: String,
    #[serde(default)]
    pub bot_key: Option<String>,
    #[serde(default)]
    pub price_mode: PriceMode,
}

fn default_active() -> bool {
    true
}

fn default_weights() -> Sides<f64> {
    Sides::splat(0.0)
}

impl BotConfig {
    /// Static validation; price-window checks need the resolved reference
    /// price and happen at grid generation.
    pub fn validate(&self) -> BotResult<()> {
        if self.name.is_empty() {
            return Err(BotError::Config("bot name cannot be empty".into()));
        }
        if self.asset_a.is_empty() || self.asset_b.is_empty() {
            return Err(BotError::Config(format!(
                "bot {}: both asset symbols are required",
                self.name
            )));
        }
        if self.asset_a == self.asset_b {
            return Err(BotError::Config(format!(
                "bot {}: assetA and assetB must differ",
                self.name
            )));
        }
        if !(self.increment_percent > 0.0 && self.increment_percent < 100.0) {
            return Err(BotError::Config(format!(
                "bot {}: incrementPercent {} outside (0, 100)",
                self.name, self.increment_percent
            )));
        }
        for (label, weight) in [
            ("buy", self.weight_distribution.buy),
            ("sell", self.weight_distribution.sell),
        ] {
            if !(-1.0..=2.0).contains(&weight) {
                return Err(BotError::Config(format!(
                    "bot {}: weightDistribution.{label} {weight} outside [-1, 2]",
                    self.name
                )));
            }
        }
        for (label, bound) in [("minPrice", &self.min_price), ("maxPrice", &self.max_price)] {
            if let BoundSpec::Multiplier(n) = bound {
                if *n <= 1.0 {
                    return Err(BotError::Config(format!(
                        "bot {}: {label} multiplier {n} must exceed 1",
                        self.name
                    )));
                }
            }
        }
        if self.preferred_account.is_empty() {
            return Err(BotError::Config(format!(
                "bot {}: preferredAccount is required",
                self.name
            )));
        }
        Ok(())
    }

    /// Stable key naming this bot's persisted state.
    pub fn bot_key(&self) -> String {
        self.bot_key.clone().unwrap_or_else(|| {
            format!(
                "{}-{}-{}",
                self.preferred_account, self.asset_a, self.asset_b
            )
            .to_lowercase()
        })
    }
}
