//! Multi-bot runner: one manager task per active bot over a shared chain
//! client.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chain::ChainClient;
use crate::config::BotsFile;
use crate::grid::manager::GridBotManager;

/// Owns the spawned bot tasks and the shared shutdown signal.
pub struct BotRunner<C: ChainClient + 'static> {
    client: Arc<C>,
    data_dir: PathBuf,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl<C: ChainClient + 'static> BotRunner<C> {
    pub fn new(client: Arc<C>, data_dir: PathBuf) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            client,
            data_dir,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Spawn a manager task for every active bot. A bot that fails startup
    /// is logged and skipped; its siblings keep running.
    pub fn spawn_all(&mut self, file: &BotsFile) {
        for config in file.active_bots() {
            let config = config.clone();
            let client = self.client.clone();
            let data_dir = self.data_dir.clone();
            let shutdown_rx = self.shutdown.subscribe();
            let name = config.name.clone();
            self.handles.push(tokio::spawn(async move {
                let mut manager = GridBotManager::new(config, client, &data_dir);
                match manager.start().await {
                    Ok(()) => {
                        if let Err(e) = manager.run(shutdown_rx).await {
                            error!("bot {name}: stopped with error: {e}");
                        }
                    }
                    Err(e) => error!("bot {name}: startup failed: {e}"),
                }
            }));
        }
        info!("spawned {} bot task(s)", self.handles.len());
    }

    pub fn bot_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and wait for every bot's final persistence pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("all bots stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Asset, GlobalProperties, SimChain};
    use std::time::Duration;

    fn sim() -> Arc<SimChain> {
        let sim = SimChain::new();
        for (id, symbol) in [("1.3.1", "ALPHA"), ("1.3.2", "BETA")] {
            sim.add_asset(Asset {
                id: id.into(),
                symbol: symbol.into(),
                precision: 5,
                options: Default::default(),
            });
        }
        sim.set_balance("trader", "1.3.1", 10_000_000);
        sim.set_balance("trader", "1.3.2", 20_000_000);
        sim.set_global_properties(GlobalProperties::default());
        Arc::new(sim)
    }

    fn bots_file() -> BotsFile {
        serde_json::from_str(
            r#"{
                "bots": [
                    {
                        "name": "alpha-beta",
                        "assetA": "ALPHA",
                        "assetB": "BETA",
                        "marketPrice": 1.85,
                        "minPrice": 1.70,
                        "maxPrice": 2.00,
                        "incrementPercent": 1.0,
                        "targetSpreadPercent": 2.0,
                        "botFunds": {"buy": "100%", "sell": "100%"},
                        "activeOrders": {"buy": 2, "sell": 2},
                        "preferredAccount": "trader"
                    },
                    {
                        "name": "disabled",
                        "assetA": "ALPHA",
                        "assetB": "BETA",
                        "active": false,
                        "marketPrice": 1.85,
                        "minPrice": 1.70,
                        "maxPrice": 2.00,
                        "incrementPercent": 1.0,
                        "targetSpreadPercent": 2.0,
                        "botFunds": {"buy": "100%", "sell": "100%"},
                        "activeOrders": {"buy": 2, "sell": 2},
                        "preferredAccount": "trader"
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_spawns_only_active_bots() {
        let sim = sim();
        let dir = tempfile::tempdir().unwrap();
        let mut runner = BotRunner::new(sim.clone(), dir.path().to_path_buf());
        runner.spawn_all(&bots_file());
        assert_eq!(runner.bot_count(), 1);

        // Wait for the spawned bot to finish startup and place its grid.
        for _ in 0..100 {
            if sim.order_count() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(sim.order_count(), 4);

        runner.shutdown().await;
    }
}
