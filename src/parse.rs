//! Parsing of configuration value forms.
//!
//! Numeric settings in the bots file accept shorthand strings: `"50%"` for a
//! share of the account balance, `"3x"` for a price bound relative to the
//! reference price, and the price sources `"pool"` and `"market"`.

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::errors::{BotError, BotResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

/// A budget: absolute amount or percentage of the account balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FundsSpec {
    Absolute(f64),
    Percent(f64),
}

impl FundsSpec {
    pub fn parse(s: &str) -> BotResult<Self> {
        let t = s.trim();
        if let Some(pct) = t.strip_suffix('%') {
            let value: f64 = pct
                .trim()
                .parse()
                .map_err(|_| BotError::Config(format!("unparseable funds share '{s}'")))?;
            Ok(FundsSpec::Percent(value))
        } else {
            let value: f64 = t
                .parse()
                .map_err(|_| BotError::Config(format!("unparseable funds value '{s}'")))?;
            Ok(FundsSpec::Absolute(value))
        }
    }

    /// Resolve against the account's total chain balance: a percentage takes
    /// its share, an absolute value is capped by what the account holds.
    pub fn resolve(&self, chain_total: f64) -> f64 {
        match self {
            FundsSpec::Percent(pct) => chain_total * pct / 100.0,
            FundsSpec::Absolute(value) => value.min(chain_total),
        }
    }
}

impl<'de> Deserialize<'de> for FundsSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Num(v) => Ok(FundsSpec::Absolute(v)),
            NumOrStr::Str(s) => FundsSpec::parse(&s).map_err(de::Error::custom),
        }
    }
}

/// A grid price bound: absolute, or a multiplier around the reference price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundSpec {
    Absolute(f64),
    Multiplier(f64),
}

impl BoundSpec {
    pub fn parse(s: &str) -> BotResult<Self> {
        let t = s.trim();
        if let Some(mult) = t.strip_suffix('x') {
            let value: f64 = mult
                .trim()
                .parse()
                .map_err(|_| BotError::Config(format!("unparseable price multiplier '{s}'")))?;
            Ok(BoundSpec::Multiplier(value))
        } else {
            let value: f64 = t
                .parse()
                .map_err(|_| BotError::Config(format!("unparseable price bound '{s}'")))?;
            Ok(BoundSpec::Absolute(value))
        }
    }

    /// Lower bound: `mp / N` for a multiplier.
    pub fn resolve_min(&self, market_price: f64) -> f64 {
        match self {
            BoundSpec::Absolute(v) => *v,
            BoundSpec::Multiplier(n) => market_price / n,
        }
    }

    /// Upper bound: `mp * N` for a multiplier.
    pub fn resolve_max(&self, market_price: f64) -> f64 {
        match self {
            BoundSpec::Absolute(v) => *v,
            BoundSpec::Multiplier(n) => market_price * n,
        }
    }
}

impl<'de> Deserialize<'de> for BoundSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Num(v) => Ok(BoundSpec::Absolute(v)),
            NumOrStr::Str(s) => BoundSpec::parse(&s).map_err(de::Error::custom),
        }
    }
}

/// The reference price: a fixed number, or one of the derivation sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceSpec {
    Fixed(f64),
    Pool,
    Market,
}

impl PriceSpec {
    pub fn parse(s: &str) -> BotResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "pool" => Ok(PriceSpec::Pool),
            "market" => Ok(PriceSpec::Market),
            other => other
                .parse()
                .map(PriceSpec::Fixed)
                .map_err(|_| BotError::Config(format!("unparseable market price '{s}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for PriceSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Num(v) => Ok(PriceSpec::Fixed(v)),
            NumOrStr::Str(s) => PriceSpec::parse(&s).map_err(de::Error::custom),
        }
    }
}

/// Source preference when the reference price is not fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    Pool,
    Market,
    #[default]
    Auto,
}
