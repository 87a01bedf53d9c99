//! Records exchanged with the chain client.
//!
//! Chain orders are opaque records keyed by their chain id; grid slots hold
//! the id as a value and never own the order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resolved asset description. Immutable after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    /// One on-chain integer unit equals `10^-precision` human units.
    pub precision: u32,
    #[serde(default)]
    pub options: AssetOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetOptions {
    /// Market fee charged on trades receiving this asset, in percent.
    pub market_fee_percent: f64,
}

/// The trading pair from the bot's point of view: A is priced in B.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetPair {
    pub a: Asset,
    pub b: Asset,
}

/// An integer amount of a specific asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset_id: String,
    pub amount: i64,
}

impl AssetAmount {
    pub fn new(asset_id: impl Into<String>, amount: i64) -> Self {
        Self {
            asset_id: asset_id.into(),
            amount,
        }
    }
}

/// Price of a resting order: an exchange of `base` for `quote`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPrice {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

/// An open limit order as reported by the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOrder {
    pub id: String,
    pub sell_price: OrderPrice,
    /// Remaining amount still for sale, in base units.
    pub for_sale: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// Free and locked balance of one asset, in integer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountBalance {
    pub free: i64,
    pub locked: i64,
}

impl AccountBalance {
    pub fn total(&self) -> i64 {
        self.free + self.locked
    }
}

/// Market ticker for a pair, prices in quote per base.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ticker {
    pub latest: f64,
    pub highest_bid: f64,
    pub lowest_ask: f64,
}

/// One aggregated order book level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Aggregated order book, best levels first.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// A liquidity pool holding both assets of a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityPool {
    pub id: String,
    pub asset_a: String,
    pub asset_b: String,
    pub balance_a: i64,
    pub balance_b: i64,
}

/// Per-operation chain fees in native integer units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OperationFees {
    pub create: i64,
    pub update: i64,
    pub cancel: i64,
}

/// Chain-wide parameters relevant to the bot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalProperties {
    pub native_asset_id: String,
    pub fees: OperationFees,
}

/// Raw account activity delivered by the subscription feed.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    Fill(FillEvent),
    /// Anything else the feed reports; ignored by the grid core.
    Other,
}

/// A (possibly partial) fill of one of the account's orders.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: String,
    pub account: String,
    /// What the order gave up in this fill.
    pub pays: AssetAmount,
    /// What the order received in this fill.
    pub receives: AssetAmount,
    pub is_maker: bool,
    pub timestamp: DateTime<Utc>,
}

/// Request to create a limit order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub seller: String,
    pub amount_to_sell: AssetAmount,
    pub min_to_receive: AssetAmount,
    pub expiration: Option<DateTime<Utc>>,
}

/// In-place modification of a resting order. Zero-delta updates without a
/// price change are rejected by the chain.
#[derive(Debug, Clone, Default)]
pub struct UpdateOrder {
    /// Signed change to the amount still for sale, in integer units.
    pub delta_amount_to_sell: i64,
    pub new_price: Option<OrderPrice>,
    pub expiration: Option<DateTime<Utc>>,
}
