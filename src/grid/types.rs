//! Core data types for the grid.

use serde::{Deserialize, Serialize};

/// Side of the book a slot trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn both() -> [Side; 2] {
        [Side::Buy, Side::Sell]
    }
}

/// A pair of values, one per side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sides<T> {
    pub buy: T,
    pub sell: T,
}

impl<T> Sides<T> {
    pub fn new(buy: T, sell: T) -> Self {
        Self { buy, sell }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}

impl Sides<f64> {
    pub fn splat(value: f64) -> Self {
        Self {
            buy: value,
            sell: value,
        }
    }
}

/// What a slot trades. `Spread` marks a placeholder inside the spread zone;
/// it is always sized zero and never on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotKind {
    Buy,
    Sell,
    Spread,
}

impl SlotKind {
    /// The side this kind trades on; `None` for spread placeholders.
    pub fn side(self) -> Option<Side> {
        match self {
            SlotKind::Buy => Some(Side::Buy),
            SlotKind::Sell => Some(Side::Sell),
            SlotKind::Spread => None,
        }
    }
}

impl From<Side> for SlotKind {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => SlotKind::Buy,
            Side::Sell => SlotKind::Sell,
        }
    }
}

/// Lifecycle of a slot. A slot on chain carries its chain order id by value;
/// a partially filled slot also remembers the size it was placed with.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Virtual,
    Active {
        chain_order_id: String,
    },
    Partial {
        chain_order_id: String,
        original_size: f64,
    },
}

impl SlotState {
    pub fn chain_order_id(&self) -> Option<&str> {
        match self {
            SlotState::Virtual => None,
            SlotState::Active { chain_order_id }
            | SlotState::Partial { chain_order_id, .. } => Some(chain_order_id),
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, SlotState::Virtual)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, SlotState::Partial { .. })
    }

    /// Active or partial: the slot has a resting chain order.
    pub fn is_on_chain(&self) -> bool {
        !self.is_virtual()
    }

    pub fn name(&self) -> &'static str {
        match self {
            SlotState::Virtual => "VIRTUAL",
            SlotState::Active { .. } => "ACTIVE",
            SlotState::Partial { .. } => "PARTIAL",
        }
    }
}

/// One slot of the grid ladder.
///
/// `price` is B per A. `size` is in asset A for sell slots and asset B for
/// buy slots.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSlot {
    pub id: String,
    pub kind: SlotKind,
    pub state: SlotState,
    pub price: f64,
    pub size: f64,
}

impl GridSlot {
    pub fn new_virtual(id: impl Into<String>, kind: SlotKind, price: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            state: SlotState::Virtual,
            price,
            size: 0.0,
        }
    }

    pub fn is_spread(&self) -> bool {
        self.kind == SlotKind::Spread
    }

    pub fn chain_order_id(&self) -> Option<&str> {
        self.state.chain_order_id()
    }

    /// The ladder this slot was generated on, read from its id. Spread
    /// placeholders keep their ladder side this way.
    pub fn ladder_side(&self) -> Side {
        if self.id.starts_with("sell") {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    /// Turn the slot into a spread placeholder after a full fill.
    pub fn clear_to_spread(&mut self) {
        self.kind = SlotKind::Spread;
        self.state = SlotState::Virtual;
        self.size = 0.0;
    }
}

/// One create operation for the batch interface.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrder {
    pub slot_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

/// Size or price re-send for a resting (non-partial) order.
#[derive(Debug, Clone, PartialEq)]
pub struct RotateOrder {
    pub slot_id: String,
    pub chain_order_id: String,
    pub price: f64,
    pub size: f64,
    /// Integer change against the amount currently resting on chain.
    pub delta_units: i64,
}

/// Price move of a partially filled order; the minimum-delta rule applies
/// when the integer amount is unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialMove {
    pub slot_id: String,
    pub chain_order_id: String,
    /// Price the order currently rests at.
    pub chain_price: f64,
    /// Price it should move to.
    pub price: f64,
    pub size: f64,
}

/// Batched chain operations produced by reconciliation, rotation, and
/// re-sizing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchUpdate {
    pub orders_to_place: Vec<PlaceOrder>,
    pub orders_to_rotate: Vec<RotateOrder>,
    pub partial_moves: Vec<PartialMove>,
}

impl BatchUpdate {
    pub fn is_empty(&self) -> bool {
        self.orders_to_place.is_empty()
            && self.orders_to_rotate.is_empty()
            && self.partial_moves.is_empty()
    }

    pub fn merge(&mut self, other: BatchUpdate) {
        self.orders_to_place.extend(other.orders_to_place);
        self.orders_to_rotate.extend(other.orders_to_rotate);
        self.partial_moves.extend(other.partial_moves);
    }
}

/// Why a correction was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionKind {
    Price,
    Size,
}

/// A pending correction of a resting order.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub slot_id: String,
    pub chain_order_id: String,
    pub expected_price: f64,
    pub expected_size: f64,
    pub kind: CorrectionKind,
}

/// De-duplicated queue of corrections awaiting a batched pass.
#[derive(Debug, Default)]
pub struct CorrectionQueue {
    items: Vec<Correction>,
}

impl CorrectionQueue {
    /// Queue a correction unless one is already pending for the same chain
    /// order. Returns whether it was added.
    pub fn push(&mut self, correction: Correction) -> bool {
        if self
            .items
            .iter()
            .any(|c| c.chain_order_id == correction.chain_order_id)
        {
            return false;
        }
        self.items.push(correction);
        true
    }

    pub fn remove(&mut self, chain_order_id: &str) {
        self.items.retain(|c| c.chain_order_id != chain_order_id);
    }

    pub fn drain(&mut self) -> Vec<Correction> {
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_slot_state_accessors() {
        let virt = SlotState::Virtual;
        assert!(virt.is_virtual());
        assert_eq!(virt.chain_order_id(), None);

        let active = SlotState::Active {
            chain_order_id: "1.7.100".into(),
        };
        assert!(active.is_on_chain());
        assert_eq!(active.chain_order_id(), Some("1.7.100"));

        let partial = SlotState::Partial {
            chain_order_id: "1.7.101".into(),
            original_size: 10.0,
        };
        assert!(partial.is_partial());
        assert!(partial.is_on_chain());
    }

    #[test]
    fn test_ladder_side_from_id() {
        let slot = GridSlot::new_virtual("sell-3", SlotKind::Spread, 1.85);
        assert_eq!(slot.ladder_side(), Side::Sell);
        let slot = GridSlot::new_virtual("buy-0", SlotKind::Buy, 1.79);
        assert_eq!(slot.ladder_side(), Side::Buy);
    }

    #[test]
    fn test_clear_to_spread() {
        let mut slot = GridSlot::new_virtual("buy-2", SlotKind::Buy, 1.75);
        slot.size = 12.5;
        slot.state = SlotState::Active {
            chain_order_id: "1.7.7".into(),
        };
        slot.clear_to_spread();
        assert!(slot.is_spread());
        assert_eq!(slot.size, 0.0);
        assert!(slot.state.is_virtual());
    }

    #[test]
    fn test_correction_queue_dedup() {
        let mut queue = CorrectionQueue::default();
        let correction = Correction {
            slot_id: "sell-1".into(),
            chain_order_id: "1.7.5".into(),
            expected_price: 1.85,
            expected_size: 10.0,
            kind: CorrectionKind::Price,
        };
        assert!(queue.push(correction.clone()));
        assert!(!queue.push(correction));
        assert_eq!(queue.len(), 1);
        queue.remove("1.7.5");
        assert!(queue.is_empty());
    }
}
