#![deny(unreachable_pub)]

//! Grid market-making core for a DEX limit order book.
//!
//! For each configured trading pair a bot maintains a geometrically spaced
//! ladder of limit orders around a reference price, sized from available
//! funds with exact integer-scaled arithmetic, reconciled against the
//! chain's open orders, and rotated across the spread as fills come in.
//!
//! The chain itself is a collaborator behind the [`chain::ChainClient`]
//! trait; anything implementing it (the bundled in-memory simulator, or a
//! real RPC client) can drive the bots.

pub mod chain;
pub mod config;
pub mod consts;
pub mod errors;
pub mod fees;
pub mod grid;
pub mod helpers;
pub mod oracle;
pub mod parse;
pub mod runner;

pub use config::{BotConfig, BotsFile};
pub use errors::{BotError, BotResult};
pub use grid::{GridBotManager, Side, Sides};
pub use runner::BotRunner;
