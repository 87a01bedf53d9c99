//! Slot store: indexed access plus derived fund totals.
//!
//! The totals are rederived from the slots after every mutation; nothing
//! writes them directly.

use std::collections::HashMap;

use crate::errors::{BotError, BotResult};

use super::types::{GridSlot, Side, Sides, SlotKind, SlotState};

/// Sums derived from the stored slots, in human units per side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridTotals {
    /// Sum of virtual non-spread slot sizes.
    pub virt: Sides<f64>,
    /// Sum of active and partial slot sizes.
    pub committed: Sides<f64>,
}

impl GridTotals {
    pub fn grid_total(&self, side: Side) -> f64 {
        self.virt.get(side) + self.committed.get(side)
    }
}

/// All slots of one bot, in ladder order: sell slots from the outside in,
/// then buy slots from the inside out.
#[derive(Debug, Default)]
pub struct OrderStore {
    slots: Vec<GridSlot>,
    by_id: HashMap<String, usize>,
    by_chain_id: HashMap<String, usize>,
    totals: GridTotals,
}

fn check_invariants(slot: &GridSlot) -> BotResult<()> {
    if slot.is_spread() && (slot.size != 0.0 || !slot.state.is_virtual()) {
        return Err(BotError::InvalidState(format!(
            "spread slot {} must be virtual with size 0",
            slot.id
        )));
    }
    if let Some(chain_id) = slot.chain_order_id() {
        if chain_id.is_empty() {
            return Err(BotError::InvalidState(format!(
                "slot {} is on chain without an order id",
                slot.id
            )));
        }
    }
    if slot.size < 0.0 {
        return Err(BotError::InvalidState(format!(
            "slot {} has negative size",
            slot.id
        )));
    }
    Ok(())
}

impl OrderStore {
    pub fn new(slots: Vec<GridSlot>) -> BotResult<Self> {
        let mut store = Self::default();
        for slot in slots {
            store.upsert(slot)?;
        }
        Ok(store)
    }

    /// Insert or replace a slot, keeping ladder order for existing ids, and
    /// rederive the totals.
    pub fn upsert(&mut self, slot: GridSlot) -> BotResult<()> {
        check_invariants(&slot)?;
        match self.by_id.get(&slot.id) {
            Some(&index) => self.slots[index] = slot,
            None => {
                self.by_id.insert(slot.id.clone(), self.slots.len());
                self.slots.push(slot);
            }
        }
        self.reindex();
        Ok(())
    }

    /// Apply a mutation to one slot, enforcing invariants and rederiving
    /// totals afterwards.
    pub fn mutate<F>(&mut self, id: &str, mutate: F) -> BotResult<()>
    where
        F: FnOnce(&mut GridSlot),
    {
        let index = *self
            .by_id
            .get(id)
            .ok_or_else(|| BotError::InvalidState(format!("unknown slot {id}")))?;
        let mut slot = self.slots[index].clone();
        mutate(&mut slot);
        check_invariants(&slot)?;
        self.slots[index] = slot;
        self.reindex();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&GridSlot> {
        self.by_id.get(id).map(|&i| &self.slots[i])
    }

    pub fn get_by_chain_id(&self, chain_id: &str) -> Option<&GridSlot> {
        self.by_chain_id.get(chain_id).map(|&i| &self.slots[i])
    }

    pub fn slots(&self) -> &[GridSlot] {
        &self.slots
    }

    pub fn by_kind(&self, kind: SlotKind) -> impl Iterator<Item = &GridSlot> {
        self.slots.iter().filter(move |s| s.kind == kind)
    }

    /// Tradeable slots of a side in ladder order, spread placeholders and
    /// partials included or not as requested.
    pub fn side_slots(&self, side: Side, include_partial: bool) -> Vec<&GridSlot> {
        self.slots
            .iter()
            .filter(|s| s.kind == SlotKind::from(side))
            .filter(|s| include_partial || !s.state.is_partial())
            .collect()
    }

    /// Number of resting (active + partial) orders on a side. Compared
    /// against the configured target everywhere.
    pub fn count_on_chain(&self, side: Side) -> usize {
        self.slots
            .iter()
            .filter(|s| s.kind == SlotKind::from(side) && s.state.is_on_chain())
            .count()
    }

    /// Virtual, sized, non-spread slots of a side, nearest market first.
    pub fn virtual_candidates(&self, side: Side) -> Vec<&GridSlot> {
        let mut candidates: Vec<&GridSlot> = self
            .slots
            .iter()
            .filter(|s| {
                s.kind == SlotKind::from(side) && s.state.is_virtual() && s.size > 0.0
            })
            .collect();
        // Nearest market: highest price for buys, lowest for sells.
        match side {
            Side::Buy => candidates.sort_by(|a, b| b.price.total_cmp(&a.price)),
            Side::Sell => candidates.sort_by(|a, b| a.price.total_cmp(&b.price)),
        }
        candidates
    }

    pub fn totals(&self) -> &GridTotals {
        &self.totals
    }

    /// Capital held in partial slots of a side.
    pub fn partial_capital(&self, side: Side) -> f64 {
        self.slots
            .iter()
            .filter(|s| s.kind == SlotKind::from(side) && s.state.is_partial())
            .map(|s| s.size)
            .sum()
    }

    fn reindex(&mut self) {
        self.by_chain_id.clear();
        let mut totals = GridTotals::default();
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(chain_id) = slot.chain_order_id() {
                self.by_chain_id.insert(chain_id.to_string(), index);
            }
            if let Some(side) = slot.kind.side() {
                if slot.state.is_virtual() {
                    *totals.virt.get_mut(side) += slot.size;
                } else {
                    *totals.committed.get_mut(side) += slot.size;
                }
            }
        }
        self.totals = totals;
    }
}
