//! Paper-trading grid bot runner.
//!
//! Drives the configured bots against the in-memory simulated chain: the
//! market is seeded from each bot's configuration and a slow price walk
//! crosses resting orders so the full fill/rotation cycle runs end to end.
//! Wiring a real chain RPC client means implementing
//! [`dexgrid::chain::ChainClient`] and handing it to [`BotRunner`] instead.
//!
//! ```bash
//! cargo run --bin gridbot -- --config bots.json
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use dexgrid::chain::{Asset, GlobalProperties, LiquidityPool, OperationFees, SimChain, Ticker};
use dexgrid::parse::PriceSpec;
use dexgrid::{BotRunner, BotsFile};

#[tokio::main]
async fn main() {
    // Load .env first so RUST_LOG from there is honoured too.
    if let Ok(path) = dotenvy::dotenv() {
        println!("loaded environment from {}", path.display());
    }

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 2 && args[1] == "--config" {
        PathBuf::from(&args[2])
    } else {
        PathBuf::from("bots.json")
    };

    let file = match BotsFile::load(&config_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to load {}: {e}", config_path.display());
            return;
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(file.log_filter()),
    )
    .init();

    let sim = Arc::new(SimChain::new());
    let markets = seed_markets(&sim, &file);
    if markets.is_empty() {
        error!("no active bots with a numeric marketPrice; nothing to paper-trade");
        return;
    }

    let mut runner = BotRunner::new(sim.clone(), file.data_dir());
    runner.spawn_all(&file);
    info!(
        "paper run: {} bot(s) against the simulated chain, ctrl-c to stop",
        runner.bot_count()
    );

    // Walk each market's price around its center so grid orders trade.
    let mut tick = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                tick += 1;
                for market in &markets {
                    let swing = 0.012 * (tick as f64 * 0.37).sin();
                    let price = market.center * (1.0 + swing);
                    sim.set_ticker(&market.asset_a, &market.asset_b, Ticker {
                        latest: price,
                        highest_bid: price * 0.999,
                        lowest_ask: price * 1.001,
                    });
                    let fills = sim.cross(&market.asset_a, &market.asset_b, price);
                    if !fills.is_empty() {
                        info!("market {} @ {:.6}: {} fill(s)", market.label, price, fills.len());
                    }
                }
            }
        }
    }

    info!("shutting down");
    runner.shutdown().await;
}

struct PaperMarket {
    label: String,
    asset_a: String,
    asset_b: String,
    center: f64,
}

/// Register assets, balances, fees, and a pool for every active bot pair.
fn seed_markets(sim: &SimChain, file: &BotsFile) -> Vec<PaperMarket> {
    sim.set_global_properties(GlobalProperties {
        native_asset_id: String::new(),
        fees: OperationFees::default(),
    });

    let mut markets = Vec::new();
    let mut next_asset = 1u32;
    for bot in file.active_bots() {
        let Some(PriceSpec::Fixed(center)) = bot.market_price else {
            error!(
                "bot {}: paper mode needs a numeric marketPrice, skipping",
                bot.name
            );
            continue;
        };

        let id_a = format!("1.3.{next_asset}");
        let id_b = format!("1.3.{}", next_asset + 1);
        next_asset += 2;
        for (id, symbol) in [(&id_a, &bot.asset_a), (&id_b, &bot.asset_b)] {
            sim.add_asset(Asset {
                id: id.clone(),
                symbol: symbol.clone(),
                precision: 5,
                options: Default::default(),
            });
        }

        // A comfortable paper balance: 1000 A and its quote-side equivalent.
        sim.set_balance(&bot.preferred_account, &id_a, 100_000_000);
        sim.set_balance(
            &bot.preferred_account,
            &id_b,
            (1000.0 * center * 100_000.0) as i64,
        );
        sim.add_pool(LiquidityPool {
            id: format!("1.19.{next_asset}"),
            asset_a: id_a.clone(),
            asset_b: id_b.clone(),
            balance_a: 100_000_000_000,
            balance_b: (1_000_000.0 * center * 100_000.0) as i64,
        });

        markets.push(PaperMarket {
            label: format!("{}/{}", bot.asset_a, bot.asset_b),
            asset_a: id_a,
            asset_b: id_b,
            center,
        });
    }
    markets
}
