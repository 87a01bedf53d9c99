//! Reconciliation of the in-memory grid against the chain's open orders.
//!
//! Chain orders are matched to slots by price and size after conversion to
//! integer units; prices are never compared for equality. Orders of the
//! pair that match nothing are cancelled, matched slots are promoted, and
//! missing orders are emitted up to the configured per-side target.

use std::collections::HashSet;

use log::{debug, warn};

use crate::chain::{AssetPair, ChainOrder};
use crate::errors::BotResult;
use crate::helpers::{price_tolerance, sizes_equal, to_float};

use super::store::OrderStore;
use super::types::{
    BatchUpdate, Correction, CorrectionKind, CorrectionQueue, PlaceOrder, Side, Sides,
    SlotKind, SlotState,
};

/// A chain order translated into the grid's conventions: price as B per A,
/// size in A for sells and B for buys.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChainOrder {
    pub id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

/// Interpret a chain order for this pair; `None` if it trades other assets.
pub fn parse_chain_order(order: &ChainOrder, pair: &AssetPair) -> Option<ParsedChainOrder> {
    let base = &order.sell_price.base;
    let quote = &order.sell_price.quote;

    if base.asset_id == pair.a.id && quote.asset_id == pair.b.id {
        // Selling A for B.
        let base_amount = to_float(base.amount, pair.a.precision);
        let quote_amount = to_float(quote.amount, pair.b.precision);
        (base_amount > 0.0).then(|| ParsedChainOrder {
            id: order.id.clone(),
            side: Side::Sell,
            price: quote_amount / base_amount,
            size: to_float(order.for_sale, pair.a.precision),
        })
    } else if base.asset_id == pair.b.id && quote.asset_id == pair.a.id {
        // Selling B for A: a buy of A.
        let base_amount = to_float(base.amount, pair.b.precision);
        let quote_amount = to_float(quote.amount, pair.a.precision);
        (quote_amount > 0.0).then(|| ParsedChainOrder {
            id: order.id.clone(),
            side: Side::Buy,
            price: base_amount / quote_amount,
            size: to_float(order.for_sale, pair.b.precision),
        })
    } else {
        None
    }
}

/// Precision of the units a side's sizes are quoted in.
pub fn size_precision(side: Side, pair: &AssetPair) -> u32 {
    match side {
        Side::Sell => pair.a.precision,
        Side::Buy => pair.b.precision,
    }
}

/// Accepted price delta between a chain order and a slot of this size.
pub fn tolerance_for(price: f64, size: f64, pair: &AssetPair) -> f64 {
    // One unit of either asset at this order's magnitude.
    let size_a = if size > 0.0 { size } else { 0.0 };
    let size_b = size_a * price;
    price_tolerance(price, size_a, size_b, pair.a.precision, pair.b.precision)
}

/// Result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub batch: BatchUpdate,
    /// Chain orders of this pair that match no slot.
    pub cancels: Vec<String>,
    pub matched: usize,
    pub promoted: usize,
}

/// Match the chain's open orders against the store and classify the diffs.
///
/// Mutates the store (promotions, partial adjustments), queues price
/// corrections, and returns the batch of missing orders plus the ids to
/// cancel. Running it twice against unchanged chain state yields no further
/// operations.
pub fn reconcile(
    store: &mut OrderStore,
    chain_orders: &[ChainOrder],
    pair: &AssetPair,
    targets: &Sides<u32>,
    corrections: &mut CorrectionQueue,
) -> BotResult<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();
    let mut claimed: HashSet<String> = HashSet::new();

    for order in chain_orders {
        let Some(parsed) = parse_chain_order(order, pair) else {
            continue;
        };
        match find_slot(store, &parsed, pair, &claimed) {
            Some(slot_id) => {
                claimed.insert(slot_id.clone());
                outcome.matched += 1;
                apply_match(store, &slot_id, &parsed, pair, corrections, &mut outcome)?;
            }
            None => {
                debug!(
                    "chain order {} ({:?} {} @ {}) matches no slot",
                    parsed.id, parsed.side, parsed.size, parsed.price
                );
                outcome.cancels.push(parsed.id);
            }
        }
    }

    // Slots still claiming an order the chain no longer reports were filled
    // or cancelled externally; they drop back to virtual.
    let live_ids: HashSet<&str> = chain_orders.iter().map(|o| o.id.as_str()).collect();
    let stale: Vec<String> = store
        .slots()
        .iter()
        .filter(|s| {
            s.chain_order_id()
                .map(|id| !live_ids.contains(id))
                .unwrap_or(false)
        })
        .map(|s| s.id.clone())
        .collect();
    for slot_id in stale {
        warn!("slot {} lost its chain order, back to virtual", slot_id);
        corrections_remove_for_slot(corrections, store, &slot_id);
        store.mutate(&slot_id, |s| s.state = SlotState::Virtual)?;
    }

    // Top the grid back up to the per-side target with virtual slots.
    for side in Side::both() {
        let target = *targets.get(side) as usize;
        let resting = store.count_on_chain(side);
        let pending: usize = outcome
            .batch
            .orders_to_place
            .iter()
            .filter(|p| p.side == side)
            .count();
        if resting + pending < target {
            for slot in store
                .virtual_candidates(side)
                .into_iter()
                .take(target - resting - pending)
            {
                outcome.batch.orders_to_place.push(PlaceOrder {
                    slot_id: slot.id.clone(),
                    side,
                    price: slot.price,
                    size: slot.size,
                });
            }
        }
    }

    Ok(outcome)
}

fn corrections_remove_for_slot(
    corrections: &mut CorrectionQueue,
    store: &OrderStore,
    slot_id: &str,
) {
    if let Some(chain_id) = store.get(slot_id).and_then(|s| s.chain_order_id()) {
        corrections.remove(chain_id);
    }
}

/// Pick the slot a chain order belongs to: its recorded owner when the ids
/// already agree, otherwise the closest slot within price tolerance and one
/// integer unit of size.
fn find_slot(
    store: &OrderStore,
    parsed: &ParsedChainOrder,
    pair: &AssetPair,
    claimed: &HashSet<String>,
) -> Option<String> {
    if let Some(slot) = store.get_by_chain_id(&parsed.id) {
        return Some(slot.id.clone());
    }

    let precision = size_precision(parsed.side, pair);
    store
        .by_kind(SlotKind::from(parsed.side))
        .filter(|slot| !claimed.contains(&slot.id) && slot.chain_order_id().is_none())
        .filter(|slot| {
            let tau = tolerance_for(slot.price, slot.size, pair);
            (slot.price - parsed.price).abs() <= tau
                && sizes_equal(slot.size, parsed.size, precision)
        })
        .min_by(|a, b| {
            (a.price - parsed.price)
                .abs()
                .total_cmp(&(b.price - parsed.price).abs())
        })
        .map(|slot| slot.id.clone())
}

fn apply_match(
    store: &mut OrderStore,
    slot_id: &str,
    parsed: &ParsedChainOrder,
    pair: &AssetPair,
    corrections: &mut CorrectionQueue,
    outcome: &mut ReconcileOutcome,
) -> BotResult<()> {
    let precision = size_precision(parsed.side, pair);
    let slot = match store.get(slot_id) {
        Some(slot) => slot.clone(),
        None => return Ok(()),
    };

    let was_virtual = slot.state.is_virtual();
    let shrunk = !sizes_equal(parsed.size, slot.size, precision) && parsed.size < slot.size;

    if was_virtual || shrunk || slot.chain_order_id() != Some(parsed.id.as_str()) {
        let chain_id = parsed.id.clone();
        let original = match &slot.state {
            SlotState::Partial { original_size, .. } => *original_size,
            _ => slot.size,
        };
        let new_size = parsed.size;
        store.mutate(slot_id, |s| {
            if shrunk {
                s.state = SlotState::Partial {
                    chain_order_id: chain_id.clone(),
                    original_size: original,
                };
                s.size = new_size;
            } else {
                s.state = SlotState::Active {
                    chain_order_id: chain_id.clone(),
                };
            }
        })?;
        if was_virtual {
            outcome.promoted += 1;
        }
    }

    // Price drift beyond tolerance becomes a queued correction.
    let tau = tolerance_for(slot.price, slot.size.max(parsed.size), pair);
    if (slot.price - parsed.price).abs() > tau {
        warn!(
            "order {} drifted: chain price {} vs slot {} (tau {})",
            parsed.id, parsed.price, slot.price, tau
        );
        corrections.push(Correction {
            slot_id: slot_id.to_string(),
            chain_order_id: parsed.id.clone(),
            expected_price: slot.price,
            expected_size: slot.size,
            kind: CorrectionKind::Price,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Asset, AssetAmount, OrderPrice};
    use crate::grid::types::GridSlot;

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

    fn chain_order(id: &str, base: (&str, i64), quote: (&str, i64), for_sale: i64) -> ChainOrder {
        ChainOrder {
            id: id.into(),
            sell_price: OrderPrice {
                base: AssetAmount::new(base.0, base.1),
                quote: AssetAmount::new(quote.0, quote.1),
            },
            for_sale,
            expiration: None,
        }
    }

    fn slot(id: &str, kind: SlotKind, price: f64, size: f64, state: SlotState) -> GridSlot {
        let mut slot = GridSlot::new_virtual(id, kind, price);
        slot.size = size;
        slot.state = state;
        slot
    }

    #[test]
    fn test_parse_both_directions() {
        let pair = pair();
        // Selling 10 A for 18.5 B, half left.
        let sell = chain_order("1.7.100", ("1.3.1", 1_000_000), ("1.3.2", 1_850_000), 500_000);
        let parsed = parse_chain_order(&sell, &pair).unwrap();
        assert_eq!(parsed.side, Side::Sell);
        assert!((parsed.price - 1.85).abs() < 1e-9);
        assert_eq!(parsed.size, 5.0);

        // Selling 18 B for 10 A: a buy at 1.80.
        let buy = chain_order("1.7.101", ("1.3.2", 1_800_000), ("1.3.1", 1_000_000), 1_800_000);
        let parsed = parse_chain_order(&buy, &pair).unwrap();
        assert_eq!(parsed.side, Side::Buy);
        assert!((parsed.price - 1.80).abs() < 1e-9);
        assert_eq!(parsed.size, 18.0);

        // Orders of other pairs are not ours to touch.
        let foreign = chain_order("1.7.102", ("1.3.9", 100), ("1.3.2", 200), 100);
        assert!(parse_chain_order(&foreign, &pair).is_none());
    }

    #[test]
    fn test_partial_fill_detected() {
        let pair = pair();
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
        let mut corrections = CorrectionQueue::default();

        let orders = vec![chain_order(
            "1.7.100",
            ("1.3.1", 1_000_000),
            ("1.3.2", 1_850_000),
            500_000,
        )];
        let outcome = reconcile(
            &mut store,
            &orders,
            &pair,
            &Sides::new(0, 1),
            &mut corrections,
        )
        .unwrap();

        assert_eq!(outcome.matched, 1);
        assert!(outcome.cancels.is_empty());
        let updated = store.get("sell-3").unwrap();
        assert!(updated.state.is_partial());
        assert_eq!(updated.size, 5.0);
        assert_eq!(updated.chain_order_id(), Some("1.7.100"));
        match &updated.state {
            SlotState::Partial { original_size, .. } => assert_eq!(*original_size, 10.0),
            other => panic!("expected partial, got {other:?}"),
        }
    }

    #[test]
    fn test_promotes_by_price_and_size() {
        let pair = pair();
        let mut store = OrderStore::new(vec![
            slot("sell-0", SlotKind::Sell, 1.90, 10.0, SlotState::Virtual),
            slot("sell-1", SlotKind::Sell, 1.85, 10.0, SlotState::Virtual),
        ])
        .unwrap();
        let mut corrections = CorrectionQueue::default();

        let orders = vec![chain_order(
            "1.7.7",
            ("1.3.1", 1_000_000),
            ("1.3.2", 1_850_000),
            1_000_000,
        )];
        let outcome = reconcile(
            &mut store,
            &orders,
            &pair,
            &Sides::new(0, 2),
            &mut corrections,
        )
        .unwrap();

        // The closer slot wins the match; the other is re-placed.
        assert_eq!(outcome.promoted, 1);
        assert_eq!(store.get("sell-1").unwrap().chain_order_id(), Some("1.7.7"));
        assert!(store.get("sell-0").unwrap().state.is_virtual());
        assert_eq!(outcome.batch.orders_to_place.len(), 1);
        assert_eq!(outcome.batch.orders_to_place[0].slot_id, "sell-0");
    }

    #[test]
    fn test_unmatched_chain_order_cancelled() {
        let pair = pair();
        let mut store = OrderStore::new(vec![slot(
            "sell-0",
            SlotKind::Sell,
            1.90,
            10.0,
            SlotState::Virtual,
        )])
        .unwrap();
        let mut corrections = CorrectionQueue::default();

        // Far off any slot price.
        let orders = vec![chain_order(
            "1.7.55",
            ("1.3.1", 1_000_000),
            ("1.3.2", 2_500_000),
            1_000_000,
        )];
        let outcome = reconcile(
            &mut store,
            &orders,
            &pair,
            &Sides::new(0, 0),
            &mut corrections,
        )
        .unwrap();
        assert_eq!(outcome.cancels, vec!["1.7.55".to_string()]);
    }

    #[test]
    fn test_stale_active_demoted() {
        let pair = pair();
        let mut store = OrderStore::new(vec![slot(
            "buy-1",
            SlotKind::Buy,
            1.80,
            18.0,
            SlotState::Active {
                chain_order_id: "1.7.9".into(),
            },
        )])
        .unwrap();
        let mut corrections = CorrectionQueue::default();

        let outcome = reconcile(
            &mut store,
            &[],
            &pair,
            &Sides::new(1, 0),
            &mut corrections,
        )
        .unwrap();
        assert!(store.get("buy-1").unwrap().state.is_virtual());
        // It immediately becomes the replacement candidate.
        assert_eq!(outcome.batch.orders_to_place.len(), 1);
        assert_eq!(outcome.batch.orders_to_place[0].slot_id, "buy-1");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let pair = pair();
        let mut store = OrderStore::new(vec![
            slot("sell-0", SlotKind::Sell, 1.90, 10.0, SlotState::Virtual),
            slot("buy-1", SlotKind::Buy, 1.80, 18.0, SlotState::Virtual),
        ])
        .unwrap();
        let mut corrections = CorrectionQueue::default();

        let orders = vec![
            chain_order("1.7.1", ("1.3.1", 1_000_000), ("1.3.2", 1_900_000), 1_000_000),
            chain_order("1.7.2", ("1.3.2", 1_800_000), ("1.3.1", 1_000_000), 1_800_000),
        ];
        let targets = Sides::new(1, 1);

        let first = reconcile(&mut store, &orders, &pair, &targets, &mut corrections).unwrap();
        assert_eq!(first.matched, 2);
        assert_eq!(first.promoted, 2);
        assert!(first.batch.is_empty());
        assert!(first.cancels.is_empty());

        // Unchanged chain state: nothing further to do.
        let second = reconcile(&mut store, &orders, &pair, &targets, &mut corrections).unwrap();
        assert_eq!(second.promoted, 0);
        assert!(second.batch.is_empty());
        assert!(second.cancels.is_empty());
        assert!(corrections.is_empty());
    }
}
