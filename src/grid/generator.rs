//! Geometric price ladder generation and spread-zone classification.

use crate::consts::{EPSILON, MIN_SPREAD_FACTOR};
use crate::errors::{BotError, BotResult};

use super::types::{GridSlot, SlotKind};

/// Resolved grid geometry: the reference price, the price window, and the
/// geometric step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridParams {
    pub market_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub increment_percent: f64,
    pub target_spread_percent: f64,
}

impl GridParams {
    pub fn validate(&self) -> BotResult<()> {
        if !(self.increment_percent > 0.0 && self.increment_percent < 100.0) {
            return Err(BotError::Config(format!(
                "incrementPercent {} outside (0, 100)",
                self.increment_percent
            )));
        }
        if self.min_price <= 0.0 || self.min_price >= self.max_price {
            return Err(BotError::Config(format!(
                "price window [{}, {}] is empty or negative",
                self.min_price, self.max_price
            )));
        }
        if self.market_price < self.min_price || self.market_price > self.max_price {
            return Err(BotError::Config(format!(
                "marketPrice {} outside [{}, {}]",
                self.market_price, self.min_price, self.max_price
            )));
        }
        if self.target_spread_percent < 0.0 {
            return Err(BotError::Config(format!(
                "targetSpreadPercent {} negative",
                self.target_spread_percent
            )));
        }
        Ok(())
    }

    pub fn step_up(&self) -> f64 {
        1.0 + self.increment_percent / 100.0
    }

    pub fn step_down(&self) -> f64 {
        1.0 - self.increment_percent / 100.0
    }

    /// Effective spread width: never narrower than a few increments.
    pub fn spread_percent(&self) -> f64 {
        self.target_spread_percent
            .max(MIN_SPREAD_FACTOR * self.increment_percent)
    }
}

/// Generate the virtual ladder: sell slots from the top of the window down
/// to the spread zone, then buy slots from the spread zone down to the
/// bottom. The innermost slots on each side are tagged as spread
/// placeholders. All slots come out sized zero in state `Virtual`.
pub fn generate_grid(params: &GridParams) -> BotResult<Vec<GridSlot>> {
    params.validate()?;

    let step_up = params.step_up();
    let step_down = params.step_down();
    let mp = params.market_price;

    let mut sell_prices = Vec::new();
    let mut price = mp * step_up.sqrt();
    while price <= params.max_price * (1.0 + EPSILON) {
        sell_prices.push(price);
        price *= step_up;
    }
    // Innermost level last, so ids count from the outside in.
    sell_prices.reverse();

    let mut buy_prices = Vec::new();
    let mut price = mp * step_down.sqrt();
    while price >= params.min_price * (1.0 - EPSILON) {
        buy_prices.push(price);
        price *= step_down;
    }

    // Spread zone: enough whole increments to cover the target width, at
    // least one slot per side.
    let spread = params.spread_percent();
    let n_spread = (((1.0 + spread / 100.0).ln() / step_up.ln()).ceil() as usize).max(2);
    let spread_buys = (n_spread / 2).min(buy_prices.len());
    let spread_sells = (n_spread - n_spread / 2).min(sell_prices.len());

    let mut slots = Vec::with_capacity(sell_prices.len() + buy_prices.len());
    let innermost_sell = sell_prices.len().saturating_sub(spread_sells);
    for (i, level) in sell_prices.iter().enumerate() {
        let kind = if i >= innermost_sell {
            SlotKind::Spread
        } else {
            SlotKind::Sell
        };
        slots.push(GridSlot::new_virtual(format!("sell-{i}"), kind, *level));
    }
    for (i, level) in buy_prices.iter().enumerate() {
        let kind = if i < spread_buys {
            SlotKind::Spread
        } else {
            SlotKind::Buy
        };
        slots.push(GridSlot::new_virtual(format!("buy-{i}"), kind, *level));
    }

    Ok(slots)
}
