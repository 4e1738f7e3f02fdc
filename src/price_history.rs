use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fpl_fetch::{Bootstrap, ChangeType, PriceChangeHistory, PriceChangeRecord};
use crate::http_cache::app_cache_dir;

const LEDGER_FILE: &str = "price_ledger.json";
const LEDGER_VERSION: u32 = 1;
const RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeenPrice {
    pub now_cost: i32,
    pub seen_at: DateTime<Utc>,
}

/// Prices observed on previous polls plus the changes detected between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceLedger {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    pub last_seen: HashMap<u32, SeenPrice>,
    #[serde(default)]
    pub changes: Vec<PriceChangeRecord>,
}

impl PriceLedger {
    /// Compares the snapshot with the last seen prices and records a rise or
    /// fall for every player whose cost moved. Returns how many were recorded.
    ///
    /// Changes are stamped with the poll time, not the moment the price moved,
    /// so the cooldown can run up to one poll interval longer than configured.
    pub fn observe(&mut self, bootstrap: &Bootstrap, now: DateTime<Utc>) -> usize {
        let mut recorded = 0usize;
        for player in &bootstrap.elements {
            if player.now_cost <= 0 {
                continue;
            }
            let prev = self.last_seen.insert(
                player.id,
                SeenPrice {
                    now_cost: player.now_cost,
                    seen_at: now,
                },
            );
            let Some(prev) = prev else { continue };
            let change_type = if player.now_cost > prev.now_cost {
                ChangeType::Rise
            } else if player.now_cost < prev.now_cost {
                ChangeType::Fall
            } else {
                continue;
            };
            debug!(
                player_id = player.id,
                from = prev.now_cost,
                to = player.now_cost,
                "price change observed"
            );
            self.changes.push(PriceChangeRecord {
                player_id: player.id,
                change_time: now,
                change_type,
            });
            recorded += 1;
        }
        self.prune(now);
        recorded
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - ChronoDuration::days(RETENTION_DAYS);
        self.changes.retain(|r| r.change_time >= horizon);
    }

    pub fn as_history(&self) -> PriceChangeHistory {
        let (risers, fallers): (Vec<_>, Vec<_>) = self
            .changes
            .iter()
            .cloned()
            .partition(|r| r.change_type == ChangeType::Rise);
        PriceChangeHistory { risers, fallers }
    }
}

/// Union of remote and locally observed records. A record present in both
/// (same player, time and direction) is kept once.
pub fn merge_history(
    remote: Option<&PriceChangeHistory>,
    local: Option<&PriceChangeHistory>,
) -> Option<PriceChangeHistory> {
    let mut out = PriceChangeHistory::default();
    for source in [remote, local].into_iter().flatten() {
        for record in source.records() {
            let bucket = match record.change_type {
                ChangeType::Rise => &mut out.risers,
                ChangeType::Fall => &mut out.fallers,
            };
            if !bucket.contains(record) {
                bucket.push(record.clone());
            }
        }
    }
    if remote.is_none() && local.is_none() {
        None
    } else {
        Some(out)
    }
}

pub fn load_ledger() -> PriceLedger {
    let Some(path) = ledger_path() else {
        return PriceLedger::default();
    };
    let Ok(raw) = fs::read_to_string(&path) else {
        return PriceLedger::default();
    };
    match serde_json::from_str::<PriceLedger>(&raw) {
        Ok(ledger) if ledger.version == LEDGER_VERSION => ledger,
        _ => {
            info!(path = %path.display(), "discarding unreadable price ledger");
            PriceLedger::default()
        }
    }
}

pub fn save_ledger(ledger: &PriceLedger) -> Result<()> {
    let Some(path) = ledger_path() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create ledger dir")?;
    }
    let mut out = ledger.clone();
    out.version = LEDGER_VERSION;
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(&out).context("serialize price ledger")?;
    fs::write(&tmp, json).context("write price ledger")?;
    fs::rename(&tmp, &path).context("swap price ledger")?;
    Ok(())
}

fn ledger_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(LEDGER_FILE))
}
