//! Derived fund accounting.
//!
//! The fund view is a pure function of the store totals, the cache ledger,
//! and the last fetched chain balances. It is recomputed after every slot
//! mutation; `available + virtual + cache + fees` never exceeds the free
//! chain balance of a side.

use crate::parse::FundsSpec;

use super::store::GridTotals;
use super::types::{Side, Sides};

/// Inputs for one derivation of the fund view.
#[derive(Debug, Clone, Copy)]
pub struct FundInputs<'a> {
    pub totals: &'a GridTotals,
    /// Residual budget carried per side across quantization and rotations.
    pub cache_funds: Sides<f64>,
    /// Accumulated native-token fee debt.
    pub bts_fees_owed: f64,
    /// Free chain balance of each side's asset, human units.
    pub chain_free: Sides<f64>,
    /// Free plus locked chain balance of each side's asset, human units.
    pub chain_total: Sides<f64>,
    /// Configured budget per side.
    pub bot_funds: &'a Sides<FundsSpec>,
    /// Native-token reservation for future order operations.
    pub fee_reservation: f64,
    /// Which side holds the native chain token, if either.
    pub native_side: Option<Side>,
}

/// The derived per-pair fund view.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FundView {
    pub virt: Sides<f64>,
    pub committed: Sides<f64>,
    pub total_grid: Sides<f64>,
    pub cache_funds: Sides<f64>,
    pub allocated: Sides<f64>,
    pub available: Sides<f64>,
    pub bts_fees_owed: f64,
}

/// Fees applicable to a side: the fee debt lives on the native-token side.
fn fees_applicable(side: Side, inputs: &FundInputs) -> f64 {
    if inputs.native_side == Some(side) {
        inputs.bts_fees_owed
    } else {
        0.0
    }
}

fn fees_reservation(side: Side, inputs: &FundInputs) -> f64 {
    if inputs.native_side == Some(side) {
        inputs.fee_reservation
    } else {
        0.0
    }
}

/// Derive the fund view from the store and the chain balances.
pub fn derive(inputs: &FundInputs) -> FundView {
    let mut view = FundView {
        bts_fees_owed: inputs.bts_fees_owed,
        cache_funds: inputs.cache_funds,
        ..FundView::default()
    };

    for side in Side::both() {
        let virt = *inputs.totals.virt.get(side);
        let committed = *inputs.totals.committed.get(side);
        *view.virt.get_mut(side) = virt;
        *view.committed.get_mut(side) = committed;
        *view.total_grid.get_mut(side) = virt + committed;

        *view.allocated.get_mut(side) = inputs
            .bot_funds
            .get(side)
            .resolve(*inputs.chain_total.get(side));

        let available = inputs.chain_free.get(side)
            - virt
            - inputs.cache_funds.get(side)
            - fees_applicable(side, inputs)
            - fees_reservation(side, inputs);
        *view.available.get_mut(side) = available.max(0.0);
    }

    view
}
