//! Chain client contract and the connection gate.
//!
//! The chain client is a collaborator, not owned by the grid core; anything
//! implementing [`ChainClient`] can drive a bot. The in-memory
//! [`sim`](super::sim) implementation backs tests and paper runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::errors::{BotError, BotResult};

use super::types::{
    AccountBalance, AccountEvent, Asset, ChainOrder, CreateOrder, GlobalProperties,
    LiquidityPool, OrderBook, Ticker, UpdateOrder,
};

/// Chain operations required by the grid core.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn connect(&self) -> BotResult<()>;
    async fn wait_for_connected(&self, timeout: Duration) -> BotResult<()>;
    fn is_connected(&self) -> bool;

    async fn lookup_asset(&self, symbol: &str) -> BotResult<Asset>;
    async fn get_assets(&self, ids: &[String]) -> BotResult<Vec<Asset>>;

    async fn get_account_balances(
        &self,
        account: &str,
    ) -> BotResult<HashMap<String, AccountBalance>>;
    async fn get_open_orders(&self, account: &str) -> BotResult<Vec<ChainOrder>>;

    async fn get_order_book(&self, base: &str, quote: &str, depth: u32) -> BotResult<OrderBook>;
    async fn get_ticker(&self, base: &str, quote: &str) -> BotResult<Ticker>;
    async fn list_liquidity_pools(&self, start: u32, limit: u32) -> BotResult<Vec<LiquidityPool>>;
    async fn get_liquidity_pool(
        &self,
        asset_a: &str,
        asset_b: &str,
    ) -> BotResult<Option<LiquidityPool>>;
    async fn get_global_properties(&self) -> BotResult<GlobalProperties>;

    /// Register a per-account event stream. Multiple subscribers on the same
    /// account each get an independent stream.
    async fn subscribe_account(
        &self,
        account: &str,
        sender: UnboundedSender<AccountEvent>,
    ) -> BotResult<()>;
    async fn unsubscribe_account(&self, account: &str) -> BotResult<()>;

    async fn create_order(&self, order: CreateOrder) -> BotResult<String>;
    async fn update_order(&self, chain_id: &str, update: UpdateOrder) -> BotResult<()>;
    async fn cancel_order(&self, chain_id: &str) -> BotResult<()>;
}

/// Owned connection context: the shared client plus the connect gate.
#[derive(Clone)]
pub struct ChainContext<C: ChainClient> {
    pub client: Arc<C>,
}

impl<C: ChainClient> ChainContext<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Connect if needed and wait until the client reports connected.
    pub async fn ensure_connected(&self, timeout: Duration) -> BotResult<()> {
        if self.client.is_connected() {
            return Ok(());
        }
        self.client.connect().await?;
        self.client.wait_for_connected(timeout).await.map_err(|e| {
            BotError::ChainTransient(format!("connection not ready: {e}"))
        })
    }
}
