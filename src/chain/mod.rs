//! Chain boundary: the client contract, wire records, and the simulator.

pub mod client;
pub mod sim;
pub mod types;

pub use client::{ChainClient, ChainContext};
pub use sim::SimChain;
pub use types::{
    AccountBalance, AccountEvent, Asset, AssetAmount, AssetOptions, AssetPair, BookLevel,
    ChainOrder, CreateOrder, FillEvent, GlobalProperties, LiquidityPool, OperationFees,
    OrderBook, OrderPrice, Ticker, UpdateOrder,
};
