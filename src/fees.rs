//! Per-asset market fees and per-operation chain fees, resolved once at
//! startup and owned by the bot.

use log::info;

use crate::chain::{AssetPair, ChainClient};
use crate::consts::FEE_RESERVE_MULTIPLIER;
use crate::errors::BotResult;
use crate::grid::types::{Side, Sides};
use crate::helpers::to_float;

/// Resolved fee context for one trading pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeCache {
    pub native_asset_id: String,
    pub native_precision: u32,
    /// Creation fee in human native units.
    pub create_fee: f64,
    pub update_fee: f64,
    pub cancel_fee: f64,
    /// Market fee percent charged on the asset each side receives:
    /// buys receive A, sells receive B.
    pub market_fee_percent: Sides<f64>,
}

impl FeeCache {
    /// Resolve chain and market fees for the pair.
    pub async fn resolve<C: ChainClient>(client: &C, pair: &AssetPair) -> BotResult<Self> {
        let props = client.get_global_properties().await?;
        let native_precision = if props.native_asset_id.is_empty() {
            5
        } else {
            client
                .get_assets(&[props.native_asset_id.clone()])
                .await?
                .into_iter()
                .next()
                .map(|a| a.precision)
                .unwrap_or(5)
        };

        let cache = Self {
            native_asset_id: props.native_asset_id,
            native_precision,
            create_fee: to_float(props.fees.create, native_precision),
            update_fee: to_float(props.fees.update, native_precision),
            cancel_fee: to_float(props.fees.cancel, native_precision),
            market_fee_percent: Sides::new(
                pair.a.options.market_fee_percent,
                pair.b.options.market_fee_percent,
            ),
        };
        info!(
            "fees resolved: create={} update={} cancel={} (native {}), market {}%/{}%",
            cache.create_fee,
            cache.update_fee,
            cache.cancel_fee,
            cache.native_asset_id,
            cache.market_fee_percent.buy,
            cache.market_fee_percent.sell,
        );
        Ok(cache)
    }

    /// Which side of the pair holds the native chain token: sells hold A,
    /// buys hold B.
    pub fn native_side(&self, pair: &AssetPair) -> Option<Side> {
        if pair.a.id == self.native_asset_id {
            Some(Side::Sell)
        } else if pair.b.id == self.native_asset_id {
            Some(Side::Buy)
        } else {
            None
        }
    }

    /// Native units reserved up front: one creation fee per configured
    /// order plus buffer for the rotations that follow.
    pub fn reservation(&self, active_orders: &Sides<u32>) -> f64 {
        FEE_RESERVE_MULTIPLIER
            * self.create_fee
            * (active_orders.buy + active_orders.sell) as f64
    }

    /// Fill proceeds net of the market fee on the received asset.
    pub fn net_proceeds(&self, side: Side, gross: f64) -> f64 {
        gross * (1.0 - self.market_fee_percent.get(side) / 100.0)
    }
}
