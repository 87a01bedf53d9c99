//! In-memory chain used by tests and paper runs.
//!
//! Implements the full [`ChainClient`] contract against local state: asset
//! registry, balances with free/locked accounting, resting orders with
//! `1.7.N` ids, pools, tickers, and per-account event fan-out. Fills are
//! injected by tests or by the paper-run price walk.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::errors::{BotError, BotResult};

use super::client::ChainClient;
use super::types::{
    AccountBalance, AccountEvent, Asset, AssetAmount, ChainOrder, CreateOrder, FillEvent,
    GlobalProperties, LiquidityPool, OrderBook, Ticker, UpdateOrder,
};

struct SimOrder {
    order: ChainOrder,
    account: String,
}

#[derive(Default)]
struct SimState {
    connected: bool,
    assets: Vec<Asset>,
    balances: HashMap<String, HashMap<String, AccountBalance>>,
    orders: HashMap<String, SimOrder>,
    pools: Vec<LiquidityPool>,
    tickers: HashMap<(String, String), Ticker>,
    books: HashMap<(String, String), OrderBook>,
    props: GlobalProperties,
    subscribers: HashMap<String, Vec<UnboundedSender<AccountEvent>>>,
    next_order: u64,
    fail_creates: bool,
}

/// Simulated chain. Cheap to share behind an `Arc`.
pub struct SimChain {
    state: Mutex<SimState>,
}

impl Default for SimChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_order: 1,
                ..SimState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }

    pub fn add_asset(&self, asset: Asset) {
        self.lock().assets.push(asset);
    }

    pub fn set_balance(&self, account: &str, asset_id: &str, free: i64) {
        self.lock()
            .balances
            .entry(account.to_string())
            .or_default()
            .insert(
                asset_id.to_string(),
                AccountBalance { free, locked: 0 },
            );
    }

    pub fn balance_of(&self, account: &str, asset_id: &str) -> AccountBalance {
        self.lock()
            .balances
            .get(account)
            .and_then(|m| m.get(asset_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn add_pool(&self, pool: LiquidityPool) {
        self.lock().pools.push(pool);
    }

    pub fn set_ticker(&self, base: &str, quote: &str, ticker: Ticker) {
        self.lock()
            .tickers
            .insert((base.to_string(), quote.to_string()), ticker);
    }

    pub fn set_book(&self, base: &str, quote: &str, book: OrderBook) {
        self.lock()
            .books
            .insert((base.to_string(), quote.to_string()), book);
    }

    pub fn set_global_properties(&self, props: GlobalProperties) {
        self.lock().props = props;
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.lock().fail_creates = fail;
    }

    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    /// Seed a resting order directly, bypassing balance checks. Returns the
    /// chain id.
    pub fn seed_order(&self, account: &str, order: ChainOrder) -> String {
        let mut st = self.lock();
        let id = if order.id.is_empty() {
            let id = format!("1.7.{}", st.next_order);
            st.next_order += 1;
            id
        } else {
            order.id.clone()
        };
        st.orders.insert(
            id.clone(),
            SimOrder {
                order: ChainOrder {
                    id: id.clone(),
                    ..order
                },
                account: account.to_string(),
            },
        );
        id
    }

    fn emit(&self, account: &str, event: AccountEvent) {
        let senders = {
            let st = self.lock();
            st.subscribers.get(account).cloned().unwrap_or_default()
        };
        for tx in senders {
            let _ = tx.send(event.clone());
        }
    }

    /// Fill `base_units` of a resting order, crediting the proceeds and
    /// notifying the account's subscribers. Fully filled orders disappear.
    pub fn fill_order(&self, order_id: &str, base_units: i64) -> BotResult<FillEvent> {
        let (event, account) = {
            let mut st = self.lock();
            let sim = st
                .orders
                .get_mut(order_id)
                .ok_or_else(|| BotError::ChainNotFound(order_id.to_string()))?;

            let fill_base = base_units.min(sim.order.for_sale).max(0);
            if fill_base == 0 {
                return Err(BotError::InvalidState(format!(
                    "order {order_id} has nothing to fill"
                )));
            }
            let ratio = sim.order.sell_price.quote.amount as f64
                / sim.order.sell_price.base.amount as f64;
            let quote_units = (fill_base as f64 * ratio).round() as i64;
            sim.order.for_sale -= fill_base;

            let account = sim.account.clone();
            let base_id = sim.order.sell_price.base.asset_id.clone();
            let quote_id = sim.order.sell_price.quote.asset_id.clone();
            let exhausted = sim.order.for_sale == 0;

            if let Some(held) = st
                .balances
                .get_mut(&account)
                .and_then(|m| m.get_mut(&base_id))
            {
                held.locked = (held.locked - fill_base).max(0);
            }
            st.balances
                .entry(account.clone())
                .or_default()
                .entry(quote_id.clone())
                .or_default()
                .free += quote_units;

            if exhausted {
                st.orders.remove(order_id);
            }

            (
                FillEvent {
                    order_id: order_id.to_string(),
                    account: account.clone(),
                    pays: AssetAmount::new(base_id, fill_base),
                    receives: AssetAmount::new(quote_id, quote_units),
                    is_maker: true,
                    timestamp: Utc::now(),
                },
                account,
            )
        };

        self.emit(&account, AccountEvent::Fill(event.clone()));
        Ok(event)
    }

    /// Fully fill every resting order of the pair crossed by `price`
    /// (expressed as B per A in human units). Drives paper runs.
    pub fn cross(&self, asset_a: &str, asset_b: &str, price: f64) -> Vec<FillEvent> {
        let crossed: Vec<(String, i64)> = {
            let st = self.lock();
            let precision = |id: &str| {
                st.assets
                    .iter()
                    .find(|a| a.id == id)
                    .map(|a| a.precision)
                    .unwrap_or(5)
            };
            let scale_a = 10f64.powi(precision(asset_a) as i32);
            let scale_b = 10f64.powi(precision(asset_b) as i32);

            st.orders
                .values()
                .filter_map(|sim| {
                    let p = &sim.order.sell_price;
                    if p.base.asset_id == asset_a && p.quote.asset_id == asset_b {
                        // Selling A for B: fills when the market rises to the ask.
                        let ask = (p.quote.amount as f64 / scale_b)
                            / (p.base.amount as f64 / scale_a);
                        (price >= ask).then(|| (sim.order.id.clone(), sim.order.for_sale))
                    } else if p.base.asset_id == asset_b && p.quote.asset_id == asset_a {
                        // Buying A with B: fills when the market falls to the bid.
                        let bid = (p.base.amount as f64 / scale_b)
                            / (p.quote.amount as f64 / scale_a);
                        (price <= bid).then(|| (sim.order.id.clone(), sim.order.for_sale))
                    } else {
                        None
                    }
                })
                .collect()
        };

        crossed
            .into_iter()
            .filter_map(|(id, for_sale)| self.fill_order(&id, for_sale).ok())
            .collect()
    }
}

#[async_trait]
impl ChainClient for SimChain {
    async fn connect(&self) -> BotResult<()> {
        self.lock().connected = true;
        Ok(())
    }

    async fn wait_for_connected(&self, timeout: Duration) -> BotResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BotError::ChainTransient("connect timeout".into()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn lookup_asset(&self, symbol: &str) -> BotResult<Asset> {
        self.lock()
            .assets
            .iter()
            .find(|a| a.symbol == symbol)
            .cloned()
            .ok_or_else(|| BotError::AssetNotFound(symbol.to_string()))
    }

    async fn get_assets(&self, ids: &[String]) -> BotResult<Vec<Asset>> {
        let st = self.lock();
        ids.iter()
            .map(|id| {
                st.assets
                    .iter()
                    .find(|a| &a.id == id)
                    .cloned()
                    .ok_or_else(|| BotError::AssetNotFound(id.clone()))
            })
            .collect()
    }

    async fn get_account_balances(
        &self,
        account: &str,
    ) -> BotResult<HashMap<String, AccountBalance>> {
        Ok(self
            .lock()
            .balances
            .get(account)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_open_orders(&self, account: &str) -> BotResult<Vec<ChainOrder>> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| o.account == account)
            .map(|o| o.order.clone())
            .collect())
    }

    async fn get_order_book(&self, base: &str, quote: &str, depth: u32) -> BotResult<OrderBook> {
        let st = self.lock();
        let mut book = st
            .books
            .get(&(base.to_string(), quote.to_string()))
            .cloned()
            .unwrap_or_default();
        book.bids.truncate(depth as usize);
        book.asks.truncate(depth as usize);
        Ok(book)
    }

    async fn get_ticker(&self, base: &str, quote: &str) -> BotResult<Ticker> {
        Ok(self
            .lock()
            .tickers
            .get(&(base.to_string(), quote.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn list_liquidity_pools(&self, start: u32, limit: u32) -> BotResult<Vec<LiquidityPool>> {
        Ok(self
            .lock()
            .pools
            .iter()
            .skip(start as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_liquidity_pool(
        &self,
        asset_a: &str,
        asset_b: &str,
    ) -> BotResult<Option<LiquidityPool>> {
        // Several pools may hold the pair; the deepest one in A wins.
        Ok(self
            .lock()
            .pools
            .iter()
            .filter(|p| p.asset_a == asset_a && p.asset_b == asset_b)
            .max_by_key(|p| p.balance_a)
            .cloned())
    }

    async fn get_global_properties(&self) -> BotResult<GlobalProperties> {
        Ok(self.lock().props.clone())
    }

    async fn subscribe_account(
        &self,
        account: &str,
        sender: UnboundedSender<AccountEvent>,
    ) -> BotResult<()> {
        self.lock()
            .subscribers
            .entry(account.to_string())
            .or_default()
            .push(sender);
        Ok(())
    }

    async fn unsubscribe_account(&self, account: &str) -> BotResult<()> {
        self.lock().subscribers.remove(account);
        Ok(())
    }

    async fn create_order(&self, order: CreateOrder) -> BotResult<String> {
        let mut st = self.lock();
        if st.fail_creates {
            return Err(BotError::ChainTransient("simulated create failure".into()));
        }
        if order.amount_to_sell.amount <= 0 || order.min_to_receive.amount <= 0 {
            return Err(BotError::ChainTransient("order amounts must be positive".into()));
        }

        let held = st
            .balances
            .entry(order.seller.clone())
            .or_default()
            .entry(order.amount_to_sell.asset_id.clone())
            .or_default();
        if held.free < order.amount_to_sell.amount {
            return Err(BotError::ChainTransient(format!(
                "insufficient balance: need {}, free {}",
                order.amount_to_sell.amount, held.free
            )));
        }
        held.free -= order.amount_to_sell.amount;
        held.locked += order.amount_to_sell.amount;

        let id = format!("1.7.{}", st.next_order);
        st.next_order += 1;
        debug!(
            "sim: created order {} selling {} {} for {} {}",
            id,
            order.amount_to_sell.amount,
            order.amount_to_sell.asset_id,
            order.min_to_receive.amount,
            order.min_to_receive.asset_id
        );
        let for_sale = order.amount_to_sell.amount;
        st.orders.insert(
            id.clone(),
            SimOrder {
                order: ChainOrder {
                    id: id.clone(),
                    sell_price: super::types::OrderPrice {
                        base: order.amount_to_sell,
                        quote: order.min_to_receive,
                    },
                    for_sale,
                    expiration: order.expiration,
                },
                account: order.seller,
            },
        );
        Ok(id)
    }

    async fn update_order(&self, chain_id: &str, update: UpdateOrder) -> BotResult<()> {
        let mut st = self.lock();
        if update.delta_amount_to_sell == 0 && update.new_price.is_none() {
            return Err(BotError::ChainTransient("zero-delta update rejected".into()));
        }
        let (account, base_id) = match st.orders.get(chain_id) {
            Some(sim) => (
                sim.account.clone(),
                sim.order.sell_price.base.asset_id.clone(),
            ),
            None => return Err(BotError::ChainNotFound(chain_id.to_string())),
        };

        if update.delta_amount_to_sell != 0 {
            let held = st
                .balances
                .entry(account)
                .or_default()
                .entry(base_id)
                .or_default();
            let delta = update.delta_amount_to_sell;
            if delta > 0 && held.free < delta {
                return Err(BotError::ChainTransient("insufficient balance for update".into()));
            }
            held.free -= delta;
            held.locked += delta;
        }

        let mut exhausted = false;
        if let Some(sim) = st.orders.get_mut(chain_id) {
            sim.order.for_sale += update.delta_amount_to_sell;
            sim.order.sell_price.base.amount += update.delta_amount_to_sell;
            if let Some(price) = update.new_price {
                sim.order.sell_price = price;
            }
            if let Some(exp) = update.expiration {
                sim.order.expiration = Some(exp);
            }
            exhausted = sim.order.for_sale <= 0;
        }
        if exhausted {
            st.orders.remove(chain_id);
        }
        Ok(())
    }

    async fn cancel_order(&self, chain_id: &str) -> BotResult<()> {
        let mut st = self.lock();
        let sim = st
            .orders
            .remove(chain_id)
            .ok_or_else(|| BotError::ChainNotFound(chain_id.to_string()))?;
        let held = st
            .balances
            .entry(sim.account)
            .or_default()
            .entry(sim.order.sell_price.base.asset_id)
            .or_default();
        held.locked = (held.locked - sim.order.for_sale).max(0);
        held.free += sim.order.for_sale;
        Ok(())
    }
}
