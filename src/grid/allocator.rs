//! Geometric weight distribution of a budget across ladder slots.
//!
//! Sizing happens in integer units at the side's precision; the rounding
//! residual is pushed into the first slot and anything that cannot be
//! placed conservatively ends up as surplus for the side's cache funds.

use crate::errors::{BotError, BotResult};
use crate::helpers::{to_float, to_int};

use super::types::{GridSlot, Side};

/// Inputs of one allocation pass over a single side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightParams {
    /// Budget in human units of the side's asset.
    pub total: f64,
    /// Number of slots to fill.
    pub count: usize,
    /// Weight exponent, in `[-1, 2]`. Zero is uniform, one concentrates
    /// toward the market, minus one toward the edges.
    pub exponent: f64,
    /// Grid increment as a fraction, in `(0, 1)`.
    pub increment: f64,
    /// Precision of the side's asset.
    pub precision: u32,
    /// When true, weights are indexed from the front of the ladder;
    /// when false, from the back.
    pub reverse: bool,
}

/// Result of an allocation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub sizes: Vec<f64>,
    /// Budget that could not be placed, in human units. Goes to the side's
    /// cache funds.
    pub surplus: f64,
}

/// Distribute `total` across `count` slots with geometric weights.
pub fn allocate(params: &WeightParams) -> BotResult<Allocation> {
    if !(-1.0..=2.0).contains(&params.exponent) {
        return Err(BotError::Config(format!(
            "weightDistribution {} outside [-1, 2]",
            params.exponent
        )));
    }
    if !(params.increment > 0.0 && params.increment < 1.0) {
        return Err(BotError::Config(format!(
            "increment fraction {} outside (0, 1)",
            params.increment
        )));
    }

    if params.count == 0 {
        return Ok(Allocation {
            sizes: Vec::new(),
            surplus: 0.0,
        });
    }
    if params.total <= 0.0 {
        return Ok(Allocation {
            sizes: vec![0.0; params.count],
            surplus: 0.0,
        });
    }

    let n = params.count;
    let base = 1.0 - params.increment;
    let weights: Vec<f64> = (0..n)
        .map(|i| {
            let idx = if params.reverse { i } else { n - 1 - i };
            base.powf(idx as f64 * params.exponent)
        })
        .collect();
    let weight_sum: f64 = weights.iter().sum();

    let unit_total = to_int(params.total, params.precision);
    let mut units: Vec<i64> = weights
        .iter()
        .map(|w| (w / weight_sum * unit_total as f64).round() as i64)
        .collect();

    // Push the rounding residual into the first slot, clamped at zero; if
    // the pass over-allocated beyond that, trim the rest in order.
    let residual = unit_total - units.iter().sum::<i64>();
    units[0] += residual;
    if units[0] < 0 {
        let mut deficit = -units[0];
        units[0] = 0;
        for unit in units.iter_mut().skip(1) {
            if deficit == 0 {
                break;
            }
            let cut = deficit.min(*unit);
            *unit -= cut;
            deficit -= cut;
        }
    }

    let surplus_units = unit_total - units.iter().sum::<i64>();
    Ok(Allocation {
        sizes: units
            .iter()
            .map(|&u| to_float(u, params.precision))
            .collect(),
        surplus: to_float(surplus_units.max(0), params.precision),
    })
}

/// Allocate a side's budget over its ladder slots, in stored order.
///
/// Buy ladders are stored innermost first and weight from the front; sell
/// ladders are stored outermost first and weight from the back. Either way
/// the mass sits toward the market for positive exponents.
pub fn allocate_side(
    slots: &[&GridSlot],
    side: Side,
    total: f64,
    exponent: f64,
    increment_percent: f64,
    precision: u32,
) -> BotResult<Allocation> {
    allocate(&WeightParams {
        total,
        count: slots.len(),
        exponent,
        increment: increment_percent / 100.0,
        precision,
        reverse: side == Side::Buy,
    })
}
