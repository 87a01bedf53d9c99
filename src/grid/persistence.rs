//! Snapshot persistence: atomic writes, retry tracking, legacy migration.
//!
//! One JSON file per bot key holds `{grid, cacheFunds, btsFeesOwed}`.
//! Failed writes are recorded and retried at the next safe point; in-memory
//! fund state is never dropped.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{BotError, BotResult};

use super::store::OrderStore;
use super::types::{GridSlot, Sides, SlotKind, SlotState};

/// Persisted form of one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSlot {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SlotKind,
    pub state: PersistedState,
    pub price: f64,
    pub size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PersistedState {
    Virtual,
    Active,
    Partial,
}

impl From<&GridSlot> for PersistedSlot {
    fn from(slot: &GridSlot) -> Self {
        let (state, chain_order_id, original_size) = match &slot.state {
            SlotState::Virtual => (PersistedState::Virtual, None, None),
            SlotState::Active { chain_order_id } => {
                (PersistedState::Active, Some(chain_order_id.clone()), None)
            }
            SlotState::Partial {
                chain_order_id,
                original_size,
            } => (
                PersistedState::Partial,
                Some(chain_order_id.clone()),
                Some(*original_size),
            ),
        };
        Self {
            id: slot.id.clone(),
            kind: slot.kind,
            state,
            price: slot.price,
            size: slot.size,
            chain_order_id,
            original_size,
        }
    }
}

impl PersistedSlot {
    /// Rebuild the in-memory slot, rejecting impossible combinations.
    pub fn into_slot(self) -> BotResult<GridSlot> {
        let state = match (self.state, self.chain_order_id) {
            (PersistedState::Virtual, _) => SlotState::Virtual,
            (PersistedState::Active, Some(chain_order_id)) => {
                SlotState::Active { chain_order_id }
            }
            (PersistedState::Partial, Some(chain_order_id)) => SlotState::Partial {
                chain_order_id,
                original_size: self.original_size.unwrap_or(self.size),
            },
            (_, None) => {
                return Err(BotError::Persistence(format!(
                    "slot {} persisted on chain without an order id",
                    self.id
                )))
            }
        };
        Ok(GridSlot {
            id: self.id,
            kind: self.kind,
            state,
            price: self.price,
            size: self.size,
        })
    }
}

/// Snapshot of one bot's grid and fund carry-overs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub grid: Vec<PersistedSlot>,
    #[serde(default)]
    pub cache_funds: Sides<f64>,
    #[serde(default)]
    pub bts_fees_owed: f64,
    /// Legacy field; merged into `cache_funds` on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_proceeds: Option<Sides<f64>>,
}

impl Snapshot {
    pub fn from_store(store: &OrderStore, cache_funds: Sides<f64>, bts_fees_owed: f64) -> Self {
        Self {
            grid: store.slots().iter().map(PersistedSlot::from).collect(),
            cache_funds,
            bts_fees_owed,
            pending_proceeds: None,
        }
    }

    /// Fold legacy fields in: `pendingProceeds` joins `cacheFunds` on the
    /// same side.
    pub fn normalize(mut self) -> Self {
        if let Some(pending) = self.pending_proceeds.take() {
            info!(
                "merging legacy pendingProceeds ({}/{}) into cacheFunds",
                pending.buy, pending.sell
            );
            self.cache_funds.buy += pending.buy;
            self.cache_funds.sell += pending.sell;
        }
        self
    }
}

/// What went wrong the last time a snapshot write failed.
#[derive(Debug, Clone)]
pub struct PersistFailure {
    pub kind: String,
    pub at: DateTime<Utc>,
}

/// Owner of one bot's snapshot file.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    pending: Option<Snapshot>,
    last_failure: Option<PersistFailure>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: None,
            last_failure: None,
        }
    }

    /// Snapshot path for a bot key, under the configured data directory.
    pub fn for_bot(data_dir: &Path, bot_key: &str) -> Self {
        Self::new(data_dir.join(format!("grid_{}.json", bot_key.replace('/', "-"))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_failure(&self) -> Option<&PersistFailure> {
        self.last_failure.as_ref()
    }

    /// Load and normalize the snapshot, if one exists.
    pub fn load(&self) -> BotResult<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        Ok(Some(snapshot.normalize()))
    }

    /// Write atomically: temp file in place, then rename. On failure the
    /// snapshot is kept for the next retry.
    pub fn save(&mut self, snapshot: &Snapshot) -> BotResult<()> {
        match self.write_atomic(snapshot) {
            Ok(()) => {
                self.pending = None;
                self.last_failure = None;
                debug!("snapshot saved to {:?}", self.path);
                Ok(())
            }
            Err(e) => {
                warn!("snapshot write to {:?} failed: {e}", self.path);
                self.pending = Some(snapshot.clone());
                self.last_failure = Some(PersistFailure {
                    kind: e.to_string(),
                    at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Retry a previously failed write. Returns whether anything was
    /// written.
    pub fn retry_pending(&mut self) -> BotResult<bool> {
        let Some(snapshot) = self.pending.take() else {
            return Ok(false);
        };
        match self.save(&snapshot) {
            Ok(()) => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn write_atomic(&self, snapshot: &Snapshot) -> BotResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let temp = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
