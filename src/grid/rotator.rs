//! Fill handling: partial adjustments, rotation across the spread, and the
//! minimum-delta rule for moving partial orders.

use log::{debug, info, warn};

use crate::chain::{AssetPair, FillEvent};
use crate::errors::BotResult;
use crate::fees::FeeCache;
use crate::helpers::{to_float, to_int};

use super::reconcile::size_precision;
use super::store::OrderStore;
use super::types::{BatchUpdate, PlaceOrder, Side, Sides, SlotState};

/// Result of applying one fill.
#[derive(Debug, Default)]
pub struct FillOutcome {
    /// The slot the fill hit, when it belongs to this grid.
    pub slot_id: Option<String>,
    /// The fill consumed the whole resting order.
    pub full: bool,
    /// A replacement order was emitted on the opposite side.
    pub batch: BatchUpdate,
    /// Net proceeds credited to the opposite side's cache, human units.
    pub proceeds: f64,
}

/// Apply a fill event to the grid.
///
/// Partial fills shrink the slot in place; full fills clear the slot to a
/// spread placeholder, bank the proceeds on the opposite side, and emit a
/// replacement order there when the side is below its target. A slot on the
/// grid's outer edge with nothing left to rotate into stays a placeholder
/// until the next re-sizing pass.
pub fn apply_fill(
    store: &mut OrderStore,
    cache_funds: &mut Sides<f64>,
    fill: &FillEvent,
    pair: &AssetPair,
    fees: &FeeCache,
    targets: &Sides<u32>,
) -> BotResult<FillOutcome> {
    let mut outcome = FillOutcome::default();

    let Some(slot) = store.get_by_chain_id(&fill.order_id).cloned() else {
        return Ok(outcome);
    };
    let Some(side) = slot.kind.side() else {
        return Ok(outcome);
    };
    outcome.slot_id = Some(slot.id.clone());

    let opposite = side.opposite();
    let precision = size_precision(side, pair);
    let opp_precision = size_precision(opposite, pair);

    let remaining_units = to_int(slot.size, precision) - fill.pays.amount;
    let gross = to_float(fill.receives.amount, opp_precision);
    let proceeds = fees.net_proceeds(side, gross);
    *cache_funds.get_mut(opposite) += proceeds;
    outcome.proceeds = proceeds;

    if remaining_units > 0 {
        let original = match &slot.state {
            SlotState::Partial { original_size, .. } => *original_size,
            _ => slot.size,
        };
        let chain_id = fill.order_id.clone();
        let new_size = to_float(remaining_units, precision);
        store.mutate(&slot.id, |s| {
            s.state = SlotState::Partial {
                chain_order_id: chain_id,
                original_size: original,
            };
            s.size = new_size;
        })?;
        debug!(
            "partial fill on {}: {} remaining of {}",
            slot.id, new_size, original
        );
        return Ok(outcome);
    }

    // Full fill: the position becomes a spread placeholder.
    outcome.full = true;
    store.mutate(&slot.id, |s| s.clear_to_spread())?;
    info!(
        "{} filled, {} {} banked for the {} side",
        slot.id,
        proceeds,
        match opposite {
            Side::Sell => &pair.a.symbol,
            Side::Buy => &pair.b.symbol,
        },
        opposite.as_str()
    );

    // Rotate: top the opposite side back up from its nearest virtual slot,
    // funded by the banked proceeds.
    let target = *targets.get(opposite) as usize;
    if store.count_on_chain(opposite) >= target {
        return Ok(outcome);
    }
    let Some(candidate) = store.virtual_candidates(opposite).first().cloned().cloned() else {
        warn!(
            "{} side has no virtual slot to rotate into, keeping placeholder",
            opposite.as_str()
        );
        return Ok(outcome);
    };

    let avail_units = to_int(*cache_funds.get(opposite), opp_precision);
    let place_units = to_int(candidate.size, opp_precision).min(avail_units);
    if place_units <= 0 {
        warn!(
            "no funds to rotate into {} ({} available)",
            candidate.id,
            cache_funds.get(opposite)
        );
        return Ok(outcome);
    }

    let place_size = to_float(place_units, opp_precision);
    *cache_funds.get_mut(opposite) = to_float(avail_units - place_units, opp_precision);
    store.mutate(&candidate.id, |s| s.size = place_size)?;
    outcome.batch.orders_to_place.push(PlaceOrder {
        slot_id: candidate.id.clone(),
        side: opposite,
        price: candidate.price,
        size: place_size,
    });

    Ok(outcome)
}

/// The minimum-delta rule for re-pricing a partially filled order.
///
/// With an unchanged integer amount, the chain rejects the update; a move
/// toward the market center is sent with a one-unit shrink instead, while a
/// move away is skipped. Non-zero deltas pass through.
pub fn partial_move_delta(
    side: Side,
    current_price: f64,
    new_price: f64,
    delta_units: i64,
) -> Option<i64> {
    if delta_units != 0 {
        return Some(delta_units);
    }
    let toward_center = match side {
        Side::Sell => new_price < current_price,
        Side::Buy => new_price > current_price,
    };
    if toward_center {
        Some(-1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Asset, AssetAmount, AssetPair};
    use crate::grid::types::{GridSlot, SlotKind};
    use chrono::Utc;

    fn pair() -> AssetPair {
        AssetPair {
            a: Asset {
                id: "1.3.1".into(),
                symbol: "ALPHA".into(),
                precision: 5,
                options: Default::default(),
            },
            b: Asset {
                id: "1.3.2".into(),
                symbol: "BETA".into(),
                precision: 5,
                options: Default::default(),
            },
        }
    }

    fn fees() -> FeeCache {
        FeeCache {
            native_asset_id: "1.3.0".into(),
            native_precision: 5,
            create_fee: 0.0,
            update_fee: 0.0,
            cancel_fee: 0.0,
            market_fee_percent: Sides::splat(0.0),
        }
    }

    fn slot(id: &str, kind: SlotKind, price: f64, size: f64, state: SlotState) -> GridSlot {
        let mut slot = GridSlot::new_virtual(id, kind, price);
        slot.size = size;
        slot.state = state;
        slot
    }

    fn fill(order_id: &str, pays: (&str, i64), receives: (&str, i64)) -> FillEvent {
        FillEvent {
            order_id: order_id.into(),
            account: "trader".into(),
            pays: AssetAmount::new(pays.0, pays.1),
            receives: AssetAmount::new(receives.0, receives.1),
            is_maker: true,
            timestamp: Utc::now(),
        }
    }

    fn rotation_store() -> OrderStore {
        OrderStore::new(vec![
            slot("sell-0", SlotKind::Sell, 1.90, 12.0, SlotState::Virtual),
            slot("sell-1", SlotKind::Sell, 1.88, 8.0, SlotState::Virtual),
            slot(
                "buy-2",
                SlotKind::Buy,
                1.80,
                18.0,
                SlotState::Active {
                    chain_order_id: "1.7.5".into(),
                },
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_full_fill_rotates_across_spread() {
        let mut store = rotation_store();
        let mut cache = Sides::new(0.0, 2.0);
        // buy-2 fills completely: pays 18 BETA, receives 10 ALPHA.
        let outcome = apply_fill(
            &mut store,
            &mut cache,
            &fill("1.7.5", ("1.3.2", 1_800_000), ("1.3.1", 1_000_000)),
            &pair(),
            &fees(),
            &Sides::new(1, 1),
        )
        .unwrap();

        assert!(outcome.full);
        let cleared = store.get("buy-2").unwrap();
        assert!(cleared.is_spread());
        assert_eq!(cleared.size, 0.0);
        assert!(cleared.state.is_virtual());

        // The nearest-market sell (lowest price) is emitted at its allocated
        // size, funded from the proceeds.
        assert_eq!(outcome.batch.orders_to_place.len(), 1);
        let placed = &outcome.batch.orders_to_place[0];
        assert_eq!(placed.slot_id, "sell-1");
        assert_eq!(placed.size, 8.0);

        // cache.sell grew by proceeds minus the placed size: 2 + 10 - 8.
        assert!((cache.sell - 4.0).abs() < 1e-9);
        assert_eq!(cache.buy, 0.0);
    }

    #[test]
    fn test_partial_fill_shrinks_in_place() {
        let mut store = OrderStore::new(vec![slot(
            "sell-3",
            SlotKind::Sell,
            1.85,
            10.0,
            SlotState::Active {
                chain_order_id: "1.7.100".into(),
            },
        )])
        .unwrap();
        let mut cache = Sides::splat(0.0);

        // Half the order trades away.
        let outcome = apply_fill(
            &mut store,
            &mut cache,
            &fill("1.7.100", ("1.3.1", 500_000), ("1.3.2", 925_000)),
            &pair(),
            &fees(),
            &Sides::new(1, 1),
        )
        .unwrap();

        assert!(!outcome.full);
        assert!(outcome.batch.is_empty());
        let updated = store.get("sell-3").unwrap();
        assert!(updated.state.is_partial());
        assert_eq!(updated.size, 5.0);
        // Proceeds of the partial portion land on the buy side.
        assert!((cache.buy - 9.25).abs() < 1e-9);
    }

    #[test]
    fn test_edge_fill_keeps_placeholder() {
        // No virtual sell left to rotate into.
        let mut store = OrderStore::new(vec![slot(
            "buy-0",
            SlotKind::Buy,
            1.80,
            18.0,
            SlotState::Active {
                chain_order_id: "1.7.5".into(),
            },
        )])
        .unwrap();
        let mut cache = Sides::splat(0.0);
        let outcome = apply_fill(
            &mut store,
            &mut cache,
            &fill("1.7.5", ("1.3.2", 1_800_000), ("1.3.1", 1_000_000)),
            &pair(),
            &fees(),
            &Sides::new(1, 1),
        )
        .unwrap();

        assert!(outcome.full);
        assert!(outcome.batch.is_empty());
        assert!(store.get("buy-0").unwrap().is_spread());
        // Proceeds stay banked for the next pass.
        assert!((cache.sell - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_capped_by_funds() {
        let mut store = rotation_store();
        // Shrink the fill so proceeds cover only part of the slot.
        store.mutate("sell-1", |s| s.size = 20.0).unwrap();
        let mut cache = Sides::new(0.0, 0.0);
        let outcome = apply_fill(
            &mut store,
            &mut cache,
            &fill("1.7.5", ("1.3.2", 1_800_000), ("1.3.1", 1_000_000)),
            &pair(),
            &fees(),
            &Sides::new(1, 1),
        )
        .unwrap();

        let placed = &outcome.batch.orders_to_place[0];
        assert_eq!(placed.size, 10.0);
        assert_eq!(store.get("sell-1").unwrap().size, 10.0);
        assert_eq!(cache.sell, 0.0);
    }

    #[test]
    fn test_unknown_fill_ignored() {
        let mut store = rotation_store();
        let mut cache = Sides::splat(0.0);
        let outcome = apply_fill(
            &mut store,
            &mut cache,
            &fill("1.7.999", ("1.3.2", 100), ("1.3.1", 50)),
            &pair(),
            &fees(),
            &Sides::new(1, 1),
        )
        .unwrap();
        assert!(outcome.slot_id.is_none());
        assert_eq!(cache.buy, 0.0);
        assert_eq!(cache.sell, 0.0);
    }

    #[test]
    fn test_market_fee_reduces_proceeds() {
        let mut store = rotation_store();
        let mut cache = Sides::splat(0.0);
        let mut fee_cache = fees();
        // Buys receive ALPHA with a 1% market fee.
        fee_cache.market_fee_percent.buy = 1.0;
        apply_fill(
            &mut store,
            &mut cache,
            &fill("1.7.5", ("1.3.2", 1_800_000), ("1.3.1", 1_000_000)),
            &pair(),
            &fee_cache,
            &Sides::new(1, 1),
        )
        .unwrap();
        // 10 gross, 9.9 net; rotation then consumes 8 of it.
        assert!((cache.sell - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_partial_move_delta_rule() {
        // Toward center with no integer change: one-unit shrink.
        assert_eq!(partial_move_delta(Side::Sell, 1.90, 1.88, 0), Some(-1));
        assert_eq!(partial_move_delta(Side::Buy, 1.80, 1.82, 0), Some(-1));
        // Away from center with no integer change: skipped.
        assert_eq!(partial_move_delta(Side::Sell, 1.88, 1.90, 0), None);
        assert_eq!(partial_move_delta(Side::Buy, 1.82, 1.80, 0), None);
        // A real delta passes through.
        assert_eq!(partial_move_delta(Side::Sell, 1.90, 1.88, -500), Some(-500));
    }
}
