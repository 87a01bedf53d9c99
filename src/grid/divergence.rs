//! Divergence detection between the ideal and the persisted grid.
//!
//! Runs after every rotation and on the periodic balance timer. A side is
//! marked for re-sizing when too much of its budget sits idle, or when the
//! RMS of per-slot relative size error against a freshly computed ideal
//! allocation crosses the threshold.

use log::debug;

use crate::consts::{GRID_REGENERATION_PERCENTAGE, RMS_PERCENTAGE};
use crate::errors::BotResult;

use super::allocator::allocate_side;
use super::funds::FundView;
use super::store::OrderStore;
use super::types::{Side, Sides};

/// Idle-funds check: cache plus available measured against the side's grid
/// total.
pub fn cache_ratio_exceeded(view: &FundView, side: Side) -> bool {
    let total = *view.total_grid.get(side);
    if total <= 0.0 {
        return false;
    }
    (view.cache_funds.get(side) + view.available.get(side)) / total
        >= GRID_REGENERATION_PERCENTAGE
}

/// Ideal per-slot sizes for a side: the allocated budget minus capital held
/// in partial slots, spread over the non-partial non-spread slots.
pub fn ideal_sizes(
    store: &OrderStore,
    side: Side,
    view: &FundView,
    exponent: f64,
    increment_percent: f64,
    precision: u32,
) -> BotResult<Vec<(String, f64)>> {
    let slots = store.side_slots(side, false);
    let budget = (view.allocated.get(side) - store.partial_capital(side)).max(0.0);
    let allocation = allocate_side(
        &slots,
        side,
        budget,
        exponent,
        increment_percent,
        precision,
    )?;
    Ok(slots
        .iter()
        .zip(allocation.sizes)
        .map(|(slot, size)| (slot.id.clone(), size))
        .collect())
}

/// RMS of relative size error between the ideal and the stored grid,
/// matched by slot id. Unmatched ideals and slots growing from zero count
/// as a full unit of error.
pub fn rms_divergence(ideal: &[(String, f64)], store: &OrderStore) -> f64 {
    let mut squares = 0.0;
    let mut count = 0usize;

    for (id, ideal_size) in ideal {
        let error: f64 = match store.get(id) {
            Some(slot) if slot.state.is_partial() || slot.is_spread() => continue,
            Some(slot) => {
                if slot.size > 0.0 {
                    (ideal_size - slot.size) / slot.size
                } else if *ideal_size > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            None => 1.0,
        };
        squares += error * error;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }
    (squares / count as f64).sqrt()
}

/// Check both sides and return which ones need a re-sizing pass.
pub fn sides_needing_resize(
    store: &OrderStore,
    view: &FundView,
    weights: &Sides<f64>,
    increment_percent: f64,
    precisions: &Sides<u32>,
) -> BotResult<Sides<bool>> {
    let mut marked = Sides::new(false, false);
    for side in Side::both() {
        if cache_ratio_exceeded(view, side) {
            debug!("{} side: idle funds past threshold", side.as_str());
            *marked.get_mut(side) = true;
            continue;
        }
        let ideal = ideal_sizes(
            store,
            side,
            view,
            *weights.get(side),
            increment_percent,
            *precisions.get(side),
        )?;
        let rms = rms_divergence(&ideal, store);
        if rms > RMS_PERCENTAGE / 100.0 {
            debug!("{} side: rms divergence {:.4}", side.as_str(), rms);
            *marked.get_mut(side) = true;
        }
    }
    Ok(marked)
}
