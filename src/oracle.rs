//! Reference price derivation.
//!
//! The grid is built around a reference price expressed as B per A. It
//! comes from a fixed configuration value, the deepest matching liquidity
//! pool, the market ticker, or an aggregated order book average, with the
//! fallback chain depending on the configured source.

use log::{debug, warn};

use crate::chain::{AssetPair, ChainClient};
use crate::consts::ORDER_BOOK_DEPTH;
use crate::errors::{BotError, BotResult};
use crate::helpers::to_float;
use crate::parse::{PriceMode, PriceSpec};

/// Derive the reference price for a pair.
///
/// `"pool"` falls back to the market ticker, `"market"` falls back to the
/// aggregated order book, and `"auto"` tries the pool first and then the
/// market.
pub async fn reference_price<C: ChainClient>(
    client: &C,
    pair: &AssetPair,
    spec: Option<&PriceSpec>,
    mode: PriceMode,
) -> BotResult<f64> {
    match spec {
        Some(PriceSpec::Fixed(value)) => Ok(*value),
        Some(PriceSpec::Pool) => pool_then_market(client, pair).await,
        Some(PriceSpec::Market) => market_price(client, pair).await,
        None => match mode {
            PriceMode::Pool => pool_then_market(client, pair).await,
            PriceMode::Market => market_price(client, pair).await,
            PriceMode::Auto => pool_then_market(client, pair).await,
        },
    }
}

async fn pool_then_market<C: ChainClient>(client: &C, pair: &AssetPair) -> BotResult<f64> {
    match pool_price(client, pair).await {
        Ok(price) => Ok(price),
        Err(e) => {
            warn!(
                "no pool price for {}/{} ({e}), falling back to market",
                pair.a.symbol, pair.b.symbol
            );
            market_price(client, pair).await
        }
    }
}

/// Price implied by the deepest pool holding the pair.
pub async fn pool_price<C: ChainClient>(client: &C, pair: &AssetPair) -> BotResult<f64> {
    let pool = match client.get_liquidity_pool(&pair.a.id, &pair.b.id).await? {
        Some(pool) => Some(pool),
        None => {
            // Some nodes only expose the paged listing; pick the deepest
            // pool in A among those matching the pair.
            client
                .list_liquidity_pools(0, 100)
                .await?
                .into_iter()
                .filter(|p| p.asset_a == pair.a.id && p.asset_b == pair.b.id)
                .max_by_key(|p| p.balance_a)
        }
    };

    let pool = pool.ok_or_else(|| {
        BotError::ChainTransient(format!(
            "no liquidity pool for {}/{}",
            pair.a.symbol, pair.b.symbol
        ))
    })?;
    let balance_a = to_float(pool.balance_a, pair.a.precision);
    let balance_b = to_float(pool.balance_b, pair.b.precision);
    if balance_a <= 0.0 || balance_b <= 0.0 {
        return Err(BotError::ChainTransient(format!(
            "pool {} is empty",
            pool.id
        )));
    }
    let price = balance_b / balance_a;
    debug!("pool {} price {}", pool.id, price);
    Ok(price)
}

/// Ticker price, falling back to the aggregated order book.
pub async fn market_price<C: ChainClient>(client: &C, pair: &AssetPair) -> BotResult<f64> {
    let ticker = client.get_ticker(&pair.a.id, &pair.b.id).await?;
    if ticker.latest > 0.0 {
        debug!("ticker price {}", ticker.latest);
        return Ok(ticker.latest);
    }
    warn!(
        "no ticker for {}/{}, falling back to order book",
        pair.a.symbol, pair.b.symbol
    );
    order_book_price(client, pair).await
}

/// Size-weighted average over the top of both book sides.
pub async fn order_book_price<C: ChainClient>(client: &C, pair: &AssetPair) -> BotResult<f64> {
    let book = client
        .get_order_book(&pair.a.id, &pair.b.id, ORDER_BOOK_DEPTH)
        .await?;

    let mut notional = 0.0;
    let mut volume = 0.0;
    for level in book.bids.iter().chain(book.asks.iter()) {
        notional += level.price * level.size;
        volume += level.size;
    }
    if volume <= 0.0 {
        return Err(BotError::ChainTransient(format!(
            "no price source for {}/{}",
            pair.a.symbol, pair.b.symbol
        )));
    }
    Ok(notional / volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Asset, BookLevel, LiquidityPool, OrderBook, SimChain, Ticker};

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

    #[tokio::test]
    async fn test_pool_price_from_deepest_pool() {
        let sim = SimChain::new();
        sim.add_pool(LiquidityPool {
            id: "1.19.1".into(),
            asset_a: "1.3.1".into(),
            asset_b: "1.3.2".into(),
            balance_a: 100_000_000,
            balance_b: 185_000_000,
        });

        let price = reference_price(&sim, &pair(), Some(&PriceSpec::Pool), PriceMode::Auto)
            .await
            .unwrap();
        assert!((price - 1.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_pool_falls_back_to_ticker() {
        let sim = SimChain::new();
        sim.set_ticker(
            "1.3.1",
            "1.3.2",
            Ticker {
                latest: 1.79,
                highest_bid: 1.78,
                lowest_ask: 1.80,
            },
        );
        let price = reference_price(&sim, &pair(), Some(&PriceSpec::Pool), PriceMode::Auto)
            .await
            .unwrap();
        assert!((price - 1.79).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_market_falls_back_to_book() {
        let sim = SimChain::new();
        sim.set_book(
            "1.3.1",
            "1.3.2",
            OrderBook {
                bids: vec![BookLevel {
                    price: 1.80,
                    size: 10.0,
                }],
                asks: vec![BookLevel {
                    price: 1.90,
                    size: 10.0,
                }],
            },
        );
        let price = reference_price(&sim, &pair(), Some(&PriceSpec::Market), PriceMode::Auto)
            .await
            .unwrap();
        assert!((price - 1.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fixed_price_wins() {
        let sim = SimChain::new();
        let price = reference_price(&sim, &pair(), Some(&PriceSpec::Fixed(1800.0)), PriceMode::Auto)
            .await
            .unwrap();
        assert_eq!(price, 1800.0);
    }

    #[tokio::test]
    async fn test_no_source_errors() {
        let sim = SimChain::new();
        let result = reference_price(&sim, &pair(), None, PriceMode::Auto).await;
        assert!(matches!(result, Err(BotError::ChainTransient(_))));
    }
}
