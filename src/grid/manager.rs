//! Per-bot orchestrator.
//!
//! One manager owns one bot's store, fund ledger, correction queue, and
//! snapshot file, and runs them on a single task: startup, fill handling,
//! the periodic balance refetch with re-sizing, and persistence retries are
//! serialized in one event loop.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::chain::{
    AccountEvent, AssetAmount, AssetPair, ChainClient, ChainContext, CreateOrder, FillEvent,
    OrderPrice, UpdateOrder,
};
use crate::config::BotConfig;
use crate::consts::{
    ACCOUNT_TOTALS_TIMEOUT, BALANCE_REFRESH_INTERVAL, CONNECT_TIMEOUT, CORRECTION_SPACING,
    FILL_DEDUP_WINDOW, MIN_ORDER_SIZE_FACTOR, PERSIST_RETRY_INTERVAL,
};
use crate::errors::{BotError, BotResult};
use crate::fees::FeeCache;
use crate::helpers::{to_float, to_int, validate_amount};
use crate::oracle;

use super::allocator::allocate_side;
use super::divergence::sides_needing_resize;
use super::funds::{self, FundInputs, FundView};
use super::generator::{generate_grid, GridParams};
use super::persistence::{Snapshot, SnapshotStore};
use super::reconcile::{reconcile, size_precision};
use super::rotator::{apply_fill, partial_move_delta};
use super::store::OrderStore;
use super::types::{
    BatchUpdate, CorrectionQueue, PlaceOrder, RotateOrder, Side, Sides, SlotState,
};

/// Per-bot identity.
#[derive(Debug, Clone)]
pub struct BotContext {
    pub name: String,
    pub account: String,
    pub bot_key: String,
}

impl BotContext {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            name: config.name.clone(),
            account: config.preferred_account.clone(),
            bot_key: config.bot_key(),
        }
    }
}

/// The grid manager for one bot.
pub struct GridBotManager<C: ChainClient> {
    ctx: BotContext,
    config: BotConfig,
    chain: ChainContext<C>,
    pair: Option<AssetPair>,
    fees: Option<FeeCache>,
    store: OrderStore,
    cache_funds: Sides<f64>,
    bts_fees_owed: f64,
    chain_free: Sides<f64>,
    chain_total: Sides<f64>,
    market_price: f64,
    corrections: CorrectionQueue,
    snapshots: SnapshotStore,
    recent_fills: VecDeque<(String, i64, Instant)>,
}

impl<C: ChainClient> GridBotManager<C> {
    pub fn new(config: BotConfig, client: Arc<C>, data_dir: &Path) -> Self {
        let ctx = BotContext::from_config(&config);
        let snapshots = SnapshotStore::for_bot(data_dir, &ctx.bot_key);
        Self {
            ctx,
            config,
            chain: ChainContext::new(client),
            pair: None,
            fees: None,
            store: OrderStore::default(),
            cache_funds: Sides::splat(0.0),
            bts_fees_owed: 0.0,
            chain_free: Sides::splat(0.0),
            chain_total: Sides::splat(0.0),
            market_price: 0.0,
            corrections: CorrectionQueue::default(),
            snapshots,
            recent_fills: VecDeque::new(),
        }
    }

    pub fn context(&self) -> &BotContext {
        &self.ctx
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    pub fn cache_funds(&self) -> &Sides<f64> {
        &self.cache_funds
    }

    pub fn market_price(&self) -> f64 {
        self.market_price
    }

    fn pair(&self) -> BotResult<&AssetPair> {
        self.pair
            .as_ref()
            .ok_or_else(|| BotError::InvalidState("assets not resolved".into()))
    }

    fn fees(&self) -> BotResult<&FeeCache> {
        self.fees
            .as_ref()
            .ok_or_else(|| BotError::InvalidState("fees not resolved".into()))
    }

    /// Derive the current fund view.
    pub fn fund_view(&self) -> FundView {
        let native_side = match (self.fees.as_ref(), self.pair.as_ref()) {
            (Some(fees), Some(pair)) => fees.native_side(pair),
            _ => None,
        };
        let fee_reservation = self
            .fees
            .as_ref()
            .map(|f| f.reservation(&self.config.active_orders))
            .unwrap_or(0.0);
        funds::derive(&FundInputs {
            totals: self.store.totals(),
            cache_funds: self.cache_funds,
            bts_fees_owed: self.bts_fees_owed,
            chain_free: self.chain_free,
            chain_total: self.chain_total,
            bot_funds: &self.config.bot_funds,
            fee_reservation,
            native_side,
        })
    }

    /// Full startup sequence: connect, resolve, build the grid, reconcile
    /// with the chain, and bring the order count up to target.
    pub async fn start(&mut self) -> BotResult<()> {
        self.config.validate()?;
        self.chain.ensure_connected(CONNECT_TIMEOUT).await?;

        let a = self.chain.client.lookup_asset(&self.config.asset_a).await?;
        let b = self.chain.client.lookup_asset(&self.config.asset_b).await?;
        info!(
            "bot {}: trading {} ({}, precision {}) against {} ({}, precision {})",
            self.ctx.name, a.symbol, a.id, a.precision, b.symbol, b.id, b.precision
        );
        let pair = AssetPair { a, b };
        self.fees = Some(FeeCache::resolve(self.chain.client.as_ref(), &pair).await?);
        self.pair = Some(pair);

        let pair = self.pair()?.clone();
        self.market_price = oracle::reference_price(
            self.chain.client.as_ref(),
            &pair,
            self.config.market_price.as_ref(),
            self.config.price_mode,
        )
        .await?;

        let params = GridParams {
            market_price: self.market_price,
            min_price: self.config.min_price.resolve_min(self.market_price),
            max_price: self.config.max_price.resolve_max(self.market_price),
            increment_percent: self.config.increment_percent,
            target_spread_percent: self.config.target_spread_percent,
        };
        self.store = OrderStore::new(generate_grid(&params)?)?;

        let restored = match self.snapshots.load() {
            Ok(Some(snapshot)) => self.adopt_snapshot(snapshot),
            Ok(None) => false,
            Err(e) => {
                warn!("bot {}: unreadable snapshot ({e}), rebuilding", self.ctx.name);
                false
            }
        };

        self.refresh_balances().await?;
        if !restored {
            self.size_grid_initial()?;
        }

        let open_orders = self
            .chain
            .client
            .get_open_orders(&self.ctx.account)
            .await?;
        let outcome = reconcile(
            &mut self.store,
            &open_orders,
            &pair,
            &self.config.active_orders,
            &mut self.corrections,
        )?;
        self.cancel_orders(&outcome.cancels).await;
        self.apply_batch(outcome.batch).await?;
        // Placement moved funds from free to locked; re-read so the fund
        // view starts consistent.
        self.refresh_balances().await?;
        self.persist();

        let view = self.fund_view();
        info!(
            "bot {}: started at {} with {} slots ({} resting buy / {} resting sell), \
             matched {} chain orders, cancelled {}; available {}/{}",
            self.ctx.name,
            self.market_price,
            self.store.slots().len(),
            self.store.count_on_chain(Side::Buy),
            self.store.count_on_chain(Side::Sell),
            outcome.matched,
            outcome.cancels.len(),
            view.available.buy,
            view.available.sell,
        );
        Ok(())
    }

    /// Event loop: fills, the balance timer, and persistence retries, until
    /// the shutdown signal flips.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> BotResult<()> {
        let (tx, mut events) = unbounded_channel();
        self.chain
            .client
            .subscribe_account(&self.ctx.account, tx)
            .await?;

        let mut balance_timer = interval(BALANCE_REFRESH_INTERVAL);
        balance_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut persist_timer = interval(PERSIST_RETRY_INTERVAL);
        persist_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Both tick once immediately; the startup pass already covered that.
        balance_timer.tick().await;
        persist_timer.tick().await;

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if let Err(e) = self.handle_account_event(event).await {
                        error!("bot {}: event handling failed: {e}", self.ctx.name);
                    }
                }
                _ = balance_timer.tick() => {
                    if let Err(e) = self.periodic_resize().await {
                        warn!("bot {}: periodic re-size failed: {e}", self.ctx.name);
                    }
                }
                _ = persist_timer.tick() => {
                    match self.snapshots.retry_pending() {
                        Ok(true) => debug!("bot {}: pending snapshot flushed", self.ctx.name),
                        Ok(false) => {}
                        Err(e) => warn!("bot {}: snapshot retry failed: {e}", self.ctx.name),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.stop().await
    }

    /// Drain what can be drained, persist, and release the subscription.
    pub async fn stop(&mut self) -> BotResult<()> {
        self.process_corrections().await;
        self.persist();
        if let Err(e) = self
            .chain
            .client
            .unsubscribe_account(&self.ctx.account)
            .await
        {
            debug!("bot {}: unsubscribe failed: {e}", self.ctx.name);
        }
        info!("bot {} stopped", self.ctx.name);
        Ok(())
    }

    /// Adopt a persisted snapshot onto the freshly generated grid. Returns
    /// false (and keeps the fresh grid) when the snapshot does not fit.
    fn adopt_snapshot(&mut self, snapshot: Snapshot) -> bool {
        for persisted in &snapshot.grid {
            if self.store.get(&persisted.id).is_none() {
                warn!(
                    "bot {}: snapshot slot {} does not fit the configured grid, rebuilding",
                    self.ctx.name, persisted.id
                );
                return false;
            }
        }
        let mut slots = Vec::with_capacity(snapshot.grid.len());
        for persisted in snapshot.grid {
            match persisted.into_slot() {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    warn!("bot {}: snapshot rejected: {e}", self.ctx.name);
                    return false;
                }
            }
        }
        for slot in slots {
            if let Err(e) = self.store.upsert(slot) {
                warn!("bot {}: snapshot rejected: {e}", self.ctx.name);
                return false;
            }
        }
        self.cache_funds = snapshot.cache_funds;
        self.bts_fees_owed = snapshot.bts_fees_owed;
        info!(
            "bot {}: restored snapshot with {} resting orders",
            self.ctx.name,
            self.store.count_on_chain(Side::Buy) + self.store.count_on_chain(Side::Sell)
        );
        true
    }

    /// First-run sizing of both sides, with the minimum-size policy.
    fn size_grid_initial(&mut self) -> BotResult<()> {
        let mut undersized: Vec<&'static str> = Vec::new();
        for side in Side::both() {
            let surplus = self.size_side(side, &mut undersized)?;
            *self.cache_funds.get_mut(side) += surplus;
        }
        if !undersized.is_empty() {
            return Err(BotError::UndersizedGrid(format!(
                "allocation per order below minimum on: {}",
                undersized.join(", ")
            )));
        }
        Ok(())
    }

    fn size_side(&mut self, side: Side, undersized: &mut Vec<&'static str>) -> BotResult<f64> {
        let pair = self.pair()?.clone();
        let fees = self.fees()?.clone();
        let precision = size_precision(side, &pair);

        let mut budget = self
            .config
            .bot_funds
            .get(side)
            .resolve(*self.chain_total.get(side));
        if fees.native_side(&pair) == Some(side) {
            let reservation = fees.reservation(&self.config.active_orders);
            info!(
                "bot {}: reserving {} native units worth of fees on the {} side",
                self.ctx.name,
                reservation,
                side.as_str()
            );
            budget = (budget - reservation).max(0.0);
        }

        let slots = self.store.side_slots(side, false);
        let allocation = allocate_side(
            &slots,
            side,
            budget,
            *self.config.weight_distribution.get(side),
            self.config.increment_percent,
            precision,
        )?;

        let assignments: Vec<(String, f64)> = slots
            .iter()
            .zip(allocation.sizes.iter())
            .map(|(slot, size)| (slot.id.clone(), *size))
            .collect();
        for (id, size) in &assignments {
            let units = to_int(*size, precision);
            if units > 0 && units < MIN_ORDER_SIZE_FACTOR {
                if !undersized.contains(&side.as_str()) {
                    undersized.push(side.as_str());
                }
            } else if units > 0 && units < 2 * MIN_ORDER_SIZE_FACTOR {
                warn!(
                    "bot {}: slot {} sized close to the minimum ({} units)",
                    self.ctx.name, id, units
                );
            }
        }
        for (id, size) in assignments {
            self.store.mutate(&id, |s| s.size = size)?;
        }
        Ok(allocation.surplus)
    }

    /// Handle one raw account event from the subscription feed.
    pub async fn handle_account_event(&mut self, event: AccountEvent) -> BotResult<()> {
        let AccountEvent::Fill(fill) = event else {
            return Ok(());
        };
        if fill.account != self.ctx.account {
            return Ok(());
        }
        if self.is_duplicate_fill(&fill) {
            debug!(
                "bot {}: duplicate fill notification for {} masked",
                self.ctx.name, fill.order_id
            );
            return Ok(());
        }

        let pair = self.pair()?.clone();
        let fees = self.fees()?.clone();
        let outcome = apply_fill(
            &mut self.store,
            &mut self.cache_funds,
            &fill,
            &pair,
            &fees,
            &self.config.active_orders,
        )?;
        match &outcome.slot_id {
            None => {
                debug!(
                    "bot {}: fill for unknown order {}",
                    self.ctx.name, fill.order_id
                );
                return Ok(());
            }
            Some(slot_id) => {
                info!(
                    "bot {}: fill on {} ({}), proceeds {}",
                    self.ctx.name,
                    slot_id,
                    if outcome.full { "full" } else { "partial" },
                    outcome.proceeds
                );
            }
        }
        if outcome.full {
            self.corrections.remove(&fill.order_id);
        }
        self.apply_batch(outcome.batch).await?;

        self.check_divergence(true).await?;
        self.process_corrections().await;
        self.persist();
        Ok(())
    }

    /// Duplicate notifications within the window share chain id and amount.
    fn is_duplicate_fill(&mut self, fill: &FillEvent) -> bool {
        let now = Instant::now();
        while let Some((_, _, at)) = self.recent_fills.front() {
            if now.duration_since(*at) > FILL_DEDUP_WINDOW {
                self.recent_fills.pop_front();
            } else {
                break;
            }
        }
        let seen = self
            .recent_fills
            .iter()
            .any(|(id, amount, _)| id == &fill.order_id && *amount == fill.pays.amount);
        if !seen {
            self.recent_fills
                .push_back((fill.order_id.clone(), fill.pays.amount, now));
        }
        seen
    }

    /// Timer-driven pass: refetch balances, then re-size whatever diverged.
    async fn periodic_resize(&mut self) -> BotResult<()> {
        self.refresh_balances().await?;
        self.check_divergence(false).await
    }

    /// Run the divergence detector and re-size the marked sides.
    async fn check_divergence(&mut self, refetch: bool) -> BotResult<()> {
        if refetch {
            self.refresh_balances().await?;
        }
        let pair = self.pair()?.clone();
        let view = self.fund_view();
        let precisions = Sides::new(pair.b.precision, pair.a.precision);
        let marked = sides_needing_resize(
            &self.store,
            &view,
            &self.config.weight_distribution,
            self.config.increment_percent,
            &precisions,
        )?;
        for side in Side::both() {
            if *marked.get(side) {
                info!(
                    "bot {}: {} side diverged, re-sizing",
                    self.ctx.name,
                    side.as_str()
                );
                // Balances are already fresh on either path into here.
                let batch = self.resize_side(side, false).await?;
                self.apply_batch(batch).await?;
            }
        }
        Ok(())
    }

    /// Re-size one side from the current chain balances: reallocate, write
    /// sizes in place, and re-send sizes for resting orders. Prices and the
    /// spread structure are not touched.
    pub async fn resize_side(&mut self, side: Side, refetch: bool) -> BotResult<BatchUpdate> {
        let pair = self.pair()?.clone();
        let fees = self.fees()?.clone();
        if refetch {
            self.refresh_balances().await?;
        }

        let precision = size_precision(side, &pair);
        let mut budget = self
            .config
            .bot_funds
            .get(side)
            .resolve(*self.chain_total.get(side));
        if fees.native_side(&pair) == Some(side) {
            budget = (budget - fees.reservation(&self.config.active_orders)).max(0.0);
        }
        budget = (budget - self.store.partial_capital(side)).max(0.0);

        let slots = self.store.side_slots(side, false);
        let allocation = allocate_side(
            &slots,
            side,
            budget,
            *self.config.weight_distribution.get(side),
            self.config.increment_percent,
            precision,
        )?;

        let mut batch = BatchUpdate::default();
        let assignments: Vec<(String, f64, f64, Option<String>, f64)> = slots
            .iter()
            .zip(allocation.sizes.iter())
            .map(|(slot, size)| {
                (
                    slot.id.clone(),
                    slot.size,
                    *size,
                    slot.chain_order_id().map(String::from),
                    slot.price,
                )
            })
            .collect();
        for (id, old_size, new_size, chain_id, price) in assignments {
            if let Some(chain_order_id) = chain_id {
                let delta_units = to_int(new_size, precision) - to_int(old_size, precision);
                if delta_units != 0 {
                    batch.orders_to_rotate.push(RotateOrder {
                        slot_id: id.clone(),
                        chain_order_id,
                        price,
                        size: new_size,
                        delta_units,
                    });
                }
            }
            self.store.mutate(&id, |s| s.size = new_size)?;
        }
        *self.cache_funds.get_mut(side) = allocation.surplus;

        self.persist();
        Ok(batch)
    }

    /// Apply a batch of chain operations. Dry-run bots log instead.
    pub async fn apply_batch(&mut self, batch: BatchUpdate) -> BotResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.config.dry_run {
            for place in &batch.orders_to_place {
                info!(
                    "bot {} (dry run): would place {} {} @ {} for {}",
                    self.ctx.name,
                    place.side.as_str(),
                    place.size,
                    place.price,
                    place.slot_id
                );
            }
            for rotate in &batch.orders_to_rotate {
                info!(
                    "bot {} (dry run): would re-send {} as size {} ({} units delta)",
                    self.ctx.name, rotate.chain_order_id, rotate.size, rotate.delta_units
                );
            }
            for partial in &batch.partial_moves {
                info!(
                    "bot {} (dry run): would move partial {} to {}",
                    self.ctx.name, partial.chain_order_id, partial.price
                );
            }
            return Ok(());
        }

        for place in batch.orders_to_place {
            match self.place_slot_order(&place).await {
                Ok(chain_id) => {
                    self.store.mutate(&place.slot_id, |s| {
                        s.state = SlotState::Active {
                            chain_order_id: chain_id.clone(),
                        };
                    })?;
                }
                Err(BotError::AmountOutOfRange { value, precision }) => {
                    error!(
                        "bot {}: slot {} amount {} invalid at precision {}, order skipped",
                        self.ctx.name, place.slot_id, value, precision
                    );
                }
                Err(e) => {
                    warn!(
                        "bot {}: placing {} failed ({e}), next pass retries",
                        self.ctx.name, place.slot_id
                    );
                }
            }
        }

        for rotate in batch.orders_to_rotate {
            let update = UpdateOrder {
                delta_amount_to_sell: rotate.delta_units,
                new_price: None,
                expiration: None,
            };
            match self
                .chain
                .client
                .update_order(&rotate.chain_order_id, update)
                .await
            {
                Ok(()) => {}
                Err(BotError::ChainNotFound(_)) => {
                    warn!(
                        "bot {}: order {} gone, probably filled",
                        self.ctx.name, rotate.chain_order_id
                    );
                    self.corrections.remove(&rotate.chain_order_id);
                }
                Err(e) => warn!(
                    "bot {}: updating {} failed: {e}",
                    self.ctx.name, rotate.chain_order_id
                ),
            }
        }

        for partial in batch.partial_moves {
            self.move_partial(&partial).await;
        }

        self.persist();
        Ok(())
    }

    async fn place_slot_order(&self, place: &PlaceOrder) -> BotResult<String> {
        let pair = self.pair()?;
        let (sell_asset, sell_precision, recv_asset, recv_precision, sell_amount, recv_amount) =
            match place.side {
                Side::Sell => (
                    &pair.a,
                    pair.a.precision,
                    &pair.b,
                    pair.b.precision,
                    place.size,
                    place.size * place.price,
                ),
                Side::Buy => (
                    &pair.b,
                    pair.b.precision,
                    &pair.a,
                    pair.a.precision,
                    place.size,
                    place.size / place.price,
                ),
            };
        let amount_to_sell = validate_amount(sell_amount, sell_precision)?;
        let min_to_receive = validate_amount(recv_amount, recv_precision)?;

        self.chain
            .client
            .create_order(CreateOrder {
                seller: self.ctx.account.clone(),
                amount_to_sell: AssetAmount::new(sell_asset.id.clone(), amount_to_sell),
                min_to_receive: AssetAmount::new(recv_asset.id.clone(), min_to_receive),
                expiration: None,
            })
            .await
    }

    /// Move a partially filled order, honouring the minimum-delta rule.
    async fn move_partial(&mut self, partial: &super::types::PartialMove) {
        let side = self
            .store
            .get(&partial.slot_id)
            .map(|s| s.ladder_side())
            .unwrap_or(Side::Sell);
        let Some(delta) = partial_move_delta(side, partial.chain_price, partial.price, 0) else {
            warn!(
                "bot {}: zero-delta move of {} away from center skipped",
                self.ctx.name, partial.chain_order_id
            );
            return;
        };
        let new_price = match self.order_price_for(side, partial.price, partial.size) {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    "bot {}: cannot express price {} for {}: {e}",
                    self.ctx.name, partial.price, partial.chain_order_id
                );
                return;
            }
        };
        let update = UpdateOrder {
            delta_amount_to_sell: delta,
            new_price: Some(new_price),
            expiration: None,
        };
        match self
            .chain
            .client
            .update_order(&partial.chain_order_id, update)
            .await
        {
            Ok(()) => {}
            Err(BotError::ChainNotFound(_)) => {
                warn!(
                    "bot {}: partial {} gone, probably filled",
                    self.ctx.name, partial.chain_order_id
                );
                self.corrections.remove(&partial.chain_order_id);
            }
            Err(e) => warn!(
                "bot {}: moving partial {} failed: {e}",
                self.ctx.name, partial.chain_order_id
            ),
        }
    }

    /// Integer price expression for an order of this side.
    fn order_price_for(&self, side: Side, price: f64, size: f64) -> BotResult<OrderPrice> {
        let pair = self.pair()?;
        let (base, quote) = match side {
            Side::Sell => (
                AssetAmount::new(pair.a.id.clone(), validate_amount(size, pair.a.precision)?),
                AssetAmount::new(
                    pair.b.id.clone(),
                    validate_amount(size * price, pair.b.precision)?,
                ),
            ),
            Side::Buy => (
                AssetAmount::new(pair.b.id.clone(), validate_amount(size, pair.b.precision)?),
                AssetAmount::new(
                    pair.a.id.clone(),
                    validate_amount(size / price, pair.a.precision)?,
                ),
            ),
        };
        Ok(OrderPrice { base, quote })
    }

    /// Drain the correction queue, spacing the chain updates out. Orders
    /// the chain no longer knows were filled in the meantime.
    pub async fn process_corrections(&mut self) {
        if self.corrections.is_empty() {
            return;
        }
        if self.config.dry_run {
            info!(
                "bot {} (dry run): would correct {} orders",
                self.ctx.name,
                self.corrections.len()
            );
            self.corrections.drain();
            return;
        }

        let pending = self.corrections.drain();
        let mut first = true;
        for correction in pending {
            if !first {
                tokio::time::sleep(CORRECTION_SPACING).await;
            }
            first = false;

            let Some(slot) = self.store.get(&correction.slot_id).cloned() else {
                continue;
            };
            if slot.chain_order_id() != Some(correction.chain_order_id.as_str()) {
                continue;
            }
            if slot.state.is_partial() {
                self.move_partial(&super::types::PartialMove {
                    slot_id: correction.slot_id.clone(),
                    chain_order_id: correction.chain_order_id.clone(),
                    chain_price: correction.expected_price,
                    price: slot.price,
                    size: slot.size,
                })
                .await;
                continue;
            }
            let side = slot.ladder_side();
            let new_price = match self.order_price_for(side, correction.expected_price, slot.size)
            {
                Ok(price) => price,
                Err(e) => {
                    warn!(
                        "bot {}: correction for {} dropped: {e}",
                        self.ctx.name, correction.chain_order_id
                    );
                    continue;
                }
            };
            match self
                .chain
                .client
                .update_order(
                    &correction.chain_order_id,
                    UpdateOrder {
                        delta_amount_to_sell: 0,
                        new_price: Some(new_price),
                        expiration: None,
                    },
                )
                .await
            {
                Ok(()) => debug!(
                    "bot {}: corrected {} to {}",
                    self.ctx.name, correction.chain_order_id, correction.expected_price
                ),
                Err(BotError::ChainNotFound(_)) => {
                    warn!(
                        "bot {}: corrected order {} gone, probably filled",
                        self.ctx.name, correction.chain_order_id
                    );
                }
                Err(e) => {
                    warn!(
                        "bot {}: correction of {} failed, requeued: {e}",
                        self.ctx.name, correction.chain_order_id
                    );
                    self.corrections.push(correction);
                }
            }
        }
    }

    /// Cancel the given chain orders (reconciliation leftovers).
    async fn cancel_orders(&mut self, chain_ids: &[String]) {
        for chain_id in chain_ids {
            if self.config.dry_run {
                info!("bot {} (dry run): would cancel {}", self.ctx.name, chain_id);
                continue;
            }
            match self.chain.client.cancel_order(chain_id).await {
                Ok(()) => info!("bot {}: cancelled stray order {}", self.ctx.name, chain_id),
                Err(BotError::ChainNotFound(_)) => {
                    debug!("bot {}: stray order {} already gone", self.ctx.name, chain_id);
                }
                Err(e) => warn!(
                    "bot {}: cancelling {} failed: {e}",
                    self.ctx.name, chain_id
                ),
            }
        }
    }

    /// Refetch the account's balances for both sides; a timeout keeps the
    /// last known values.
    async fn refresh_balances(&mut self) -> BotResult<()> {
        let pair = self.pair()?.clone();
        match timeout(
            ACCOUNT_TOTALS_TIMEOUT,
            self.chain.client.get_account_balances(&self.ctx.account),
        )
        .await
        {
            Ok(Ok(balances)) => {
                let a = balances.get(&pair.a.id).copied().unwrap_or_default();
                let b = balances.get(&pair.b.id).copied().unwrap_or_default();
                // Buys spend B, sells spend A.
                self.chain_free = Sides::new(
                    to_float(b.free, pair.b.precision),
                    to_float(a.free, pair.a.precision),
                );
                self.chain_total = Sides::new(
                    to_float(b.total(), pair.b.precision),
                    to_float(a.total(), pair.a.precision),
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "bot {}: account totals timed out, proceeding with last known balances",
                    self.ctx.name
                );
                Ok(())
            }
        }
    }

    /// Write the snapshot; failures are recorded and retried by the timer.
    fn persist(&mut self) {
        let snapshot = Snapshot::from_store(&self.store, self.cache_funds, self.bts_fees_owed);
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!("bot {}: snapshot not saved: {e}", self.ctx.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Asset, GlobalProperties, OperationFees, SimChain};
    use crate::parse::{BoundSpec, FundsSpec, PriceMode, PriceSpec};

    fn asset(id: &str, symbol: &str) -> Asset {
        Asset {
            id: id.into(),
            symbol: symbol.into(),
            precision: 5,
            options: Default::default(),
        }
    }

    fn sim_with_market() -> Arc<SimChain> {
        let sim = SimChain::new();
        sim.add_asset(asset("1.3.0", "CORE"));
        sim.add_asset(asset("1.3.1", "ALPHA"));
        sim.add_asset(asset("1.3.2", "BETA"));
        sim.set_balance("trader", "1.3.1", 10_000_000); // 100 ALPHA
        sim.set_balance("trader", "1.3.2", 20_000_000); // 200 BETA
        sim.set_global_properties(GlobalProperties {
            native_asset_id: "1.3.0".into(),
            fees: OperationFees {
                create: 10,
                update: 5,
                cancel: 2,
            },
        });
        Arc::new(sim)
    }

    fn test_config() -> BotConfig {
        BotConfig {
            name: "alpha-beta".into(),
            asset_a: "ALPHA".into(),
            asset_b: "BETA".into(),
            active: true,
            dry_run: false,
            market_price: Some(PriceSpec::Fixed(1.85)),
            min_price: BoundSpec::Absolute(1.70),
            max_price: BoundSpec::Absolute(2.00),
            increment_percent: 1.0,
            target_spread_percent: 2.0,
            weight_distribution: Sides::splat(0.0),
            bot_funds: Sides::new(FundsSpec::Percent(100.0), FundsSpec::Percent(100.0)),
            active_orders: Sides::new(2, 2),
            preferred_account: "trader".into(),
            bot_key: None,
            price_mode: PriceMode::Auto,
        }
    }

    async fn started_manager(
        sim: &Arc<SimChain>,
        dir: &tempfile::TempDir,
        config: BotConfig,
    ) -> GridBotManager<SimChain> {
        let mut manager = GridBotManager::new(config, sim.clone(), dir.path());
        manager.start().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_startup_places_up_to_target() {
        let sim = sim_with_market();
        let dir = tempfile::tempdir().unwrap();
        let manager = started_manager(&sim, &dir, test_config()).await;

        assert_eq!(manager.store().count_on_chain(Side::Buy), 2);
        assert_eq!(manager.store().count_on_chain(Side::Sell), 2);
        assert_eq!(sim.order_count(), 4);

        // The innermost non-spread levels went on chain first.
        assert!(manager.store().get("sell-6").unwrap().state.is_on_chain());
        assert!(manager.store().get("sell-5").unwrap().state.is_on_chain());
        assert!(manager.store().get("buy-1").unwrap().state.is_on_chain());
        assert!(manager.store().get("buy-2").unwrap().state.is_on_chain());

        // Snapshot written on the way out.
        assert!(manager.snapshots.path().exists());
    }

    #[tokio::test]
    async fn test_fill_rotates_across_the_spread() {
        let sim = sim_with_market();
        let dir = tempfile::tempdir().unwrap();
        let mut manager = started_manager(&sim, &dir, test_config()).await;

        // A sell executes: its slot becomes a placeholder, proceeds bank on
        // the buy side, and the sell count drops below target.
        let sell_id = manager
            .store()
            .get("sell-6")
            .unwrap()
            .chain_order_id()
            .unwrap()
            .to_string();
        let sell_size = manager.store().get("sell-6").unwrap().size;
        let event = sim.fill_order(&sell_id, to_int(sell_size, 5)).unwrap();
        manager
            .handle_account_event(AccountEvent::Fill(event))
            .await
            .unwrap();

        assert!(manager.store().get("sell-6").unwrap().is_spread());
        assert_eq!(manager.store().count_on_chain(Side::Sell), 1);
        assert!(manager.cache_funds().buy > 0.0);

        // A buy then executes: rotation uses its proceeds to re-arm the
        // sell side from the nearest virtual level.
        let buy_id = manager
            .store()
            .get("buy-1")
            .unwrap()
            .chain_order_id()
            .unwrap()
            .to_string();
        let buy_size = manager.store().get("buy-1").unwrap().size;
        let event = sim.fill_order(&buy_id, to_int(buy_size, 5)).unwrap();
        manager
            .handle_account_event(AccountEvent::Fill(event))
            .await
            .unwrap();

        assert!(manager.store().get("buy-1").unwrap().is_spread());
        assert_eq!(manager.store().count_on_chain(Side::Sell), 2);
        // The replacement is the next virtual sell toward the market.
        assert!(manager.store().get("sell-4").unwrap().state.is_on_chain());
    }

    #[tokio::test]
    async fn test_duplicate_fill_masked() {
        let sim = sim_with_market();
        let dir = tempfile::tempdir().unwrap();
        let mut manager = started_manager(&sim, &dir, test_config()).await;

        let buy_id = manager
            .store()
            .get("buy-1")
            .unwrap()
            .chain_order_id()
            .unwrap()
            .to_string();
        let buy_units = to_int(manager.store().get("buy-1").unwrap().size, 5);

        // Half fills; the same notification arrives twice.
        let event = sim.fill_order(&buy_id, buy_units / 2).unwrap();
        manager
            .handle_account_event(AccountEvent::Fill(event.clone()))
            .await
            .unwrap();
        let size_after_first = manager.store().get("buy-1").unwrap().size;
        let cache_after_first = *manager.cache_funds();

        manager
            .handle_account_event(AccountEvent::Fill(event))
            .await
            .unwrap();
        assert_eq!(manager.store().get("buy-1").unwrap().size, size_after_first);
        assert_eq!(*manager.cache_funds(), cache_after_first);
        assert!(manager.store().get("buy-1").unwrap().state.is_partial());
    }

    #[tokio::test]
    async fn test_dry_run_never_touches_the_chain() {
        let sim = sim_with_market();
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.dry_run = true;
        let manager = started_manager(&sim, &dir, config).await;

        assert_eq!(sim.order_count(), 0);
        for slot in manager.store().slots() {
            assert!(slot.state.is_virtual());
        }
        // Sizes are still allocated so the operator sees the would-be grid.
        assert!(manager.store().totals().virt.sell > 0.0);
    }

    #[tokio::test]
    async fn test_restart_restores_snapshot_without_churn() {
        let sim = sim_with_market();
        let dir = tempfile::tempdir().unwrap();
        let manager = started_manager(&sim, &dir, test_config()).await;
        let orders_before = sim.order_count();
        drop(manager);

        let manager = started_manager(&sim, &dir, test_config()).await;
        // Same orders, same slots; reconciliation matched by chain id and
        // had nothing to create or cancel.
        assert_eq!(sim.order_count(), orders_before);
        assert_eq!(manager.store().count_on_chain(Side::Buy), 2);
        assert_eq!(manager.store().count_on_chain(Side::Sell), 2);
    }

    #[tokio::test]
    async fn test_resize_doubles_with_doubled_balance() {
        let sim = sim_with_market();
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.dry_run = true;
        let mut manager = started_manager(&sim, &dir, config).await;

        let old_sizes: Vec<(String, f64)> = manager
            .store()
            .side_slots(Side::Buy, false)
            .iter()
            .map(|s| (s.id.clone(), s.size))
            .collect();

        // Double the buy-side balance and re-size.
        sim.set_balance("trader", "1.3.2", 40_000_000);
        manager.resize_side(Side::Buy, true).await.unwrap();

        for (id, old_size) in old_sizes {
            let new_size = manager.store().get(&id).unwrap().size;
            assert!(
                (new_size - 2.0 * old_size).abs() <= 2e-5,
                "{id}: {new_size} vs doubled {old_size}"
            );
        }
    }

    #[tokio::test]
    async fn test_undersized_grid_aborts_startup() {
        let sim = sim_with_market();
        sim.set_balance("trader", "1.3.1", 50); // 0.0005 ALPHA
        sim.set_balance("trader", "1.3.2", 50);
        let dir = tempfile::tempdir().unwrap();
        let mut manager = GridBotManager::new(test_config(), sim.clone(), dir.path());
        let result = manager.start().await;
        assert!(matches!(result, Err(BotError::UndersizedGrid(_))));
    }
}
