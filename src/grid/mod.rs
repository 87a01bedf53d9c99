//! The grid core: ladder generation, sizing, slot store, fund accounting,
//! chain reconciliation, divergence detection, rotation, and the per-bot
//! manager that ties them together.

pub mod allocator;
pub mod divergence;
pub mod generator;
pub mod funds;
pub mod manager;
pub mod persistence;
pub mod reconcile;
pub mod rotator;
pub mod store;
pub mod types;

pub use allocator::{allocate, allocate_side, Allocation, WeightParams};
pub use funds::{FundInputs, FundView};
pub use generator::{generate_grid, GridParams};
pub use manager::{BotContext, GridBotManager};
pub use persistence::{Snapshot, SnapshotStore};
pub use reconcile::{parse_chain_order, reconcile, ParsedChainOrder, ReconcileOutcome};
pub use rotator::{apply_fill, partial_move_delta, FillOutcome};
pub use store::{GridTotals, OrderStore};
pub use types::{
    BatchUpdate, Correction, CorrectionKind, CorrectionQueue, GridSlot, PartialMove, PlaceOrder,
    RotateOrder, Side, Sides, SlotKind, SlotState,
};
