use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::http_cache::fetch_json_cached;
use crate::http_client::http_client;

pub const FPL_API_BASE: &str = "https://fantasy.premierleague.com/api";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(default)]
    pub elements: Vec<BootstrapPlayer>,
    #[serde(default)]
    pub teams: Vec<BootstrapTeam>,
    #[serde(default)]
    pub events: Vec<GameweekEvent>,
    #[serde(default)]
    pub total_players: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapPlayer {
    pub id: u32,
    #[serde(default)]
    pub web_name: String,
    #[serde(default)]
    pub element_type: u8,
    #[serde(default)]
    pub team: u32,
    #[serde(default, deserialize_with = "decimal_string")]
    pub selected_by_percent: String,
    #[serde(default, deserialize_with = "decimal_string")]
    pub form: String,
    #[serde(default)]
    pub now_cost: i32,
    #[serde(default)]
    pub total_points: i32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transfers_in_event: u64,
    #[serde(default)]
    pub transfers_out_event: u64,
}

impl BootstrapPlayer {
    pub fn ownership_pct(&self) -> f64 {
        parse_decimal(&self.selected_by_percent).clamp(0.0, 100.0)
    }

    pub fn form_rating(&self) -> f64 {
        parse_decimal(&self.form)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapTeam {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameweekEvent {
    pub id: u32,
    #[serde(default)]
    pub deadline_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub is_next: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferFeed {
    #[serde(default)]
    pub transfers_in: Vec<TransferEntry>,
    #[serde(default)]
    pub transfers_out: Vec<TransferEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEntry {
    pub id: u32,
    #[serde(default)]
    pub web_name: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub now_cost: i32,
    #[serde(default)]
    pub transfers_in_event: u64,
    #[serde(default)]
    pub transfers_out_event: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Rise,
    Fall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeRecord {
    pub player_id: u32,
    pub change_time: DateTime<Utc>,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeHistory {
    #[serde(default)]
    pub risers: Vec<PriceChangeRecord>,
    #[serde(default)]
    pub fallers: Vec<PriceChangeRecord>,
}

impl PriceChangeHistory {
    pub fn records(&self) -> impl Iterator<Item = &PriceChangeRecord> {
        self.risers.iter().chain(self.fallers.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.risers.is_empty() && self.fallers.is_empty()
    }
}

pub fn position_label(element_type: u8) -> &'static str {
    match element_type {
        1 => "GKP",
        2 => "DEF",
        3 => "MID",
        4 => "FWD",
        _ => "UNK",
    }
}

pub fn fetch_bootstrap(api_base: &str, max_age_secs: u64) -> Result<Bootstrap> {
    let client = http_client()?;
    let url = format!("{}/bootstrap-static/", api_base.trim_end_matches('/'));
    let body = fetch_json_cached(client, &url, max_age_secs).context("bootstrap request failed")?;
    let bootstrap = parse_bootstrap_json(&body)?;
    debug!(players = bootstrap.elements.len(), "bootstrap parsed");
    Ok(bootstrap)
}

pub fn fetch_transfer_feed(url: &str, max_age_secs: u64) -> Result<TransferFeed> {
    let client = http_client()?;
    let body = fetch_json_cached(client, url, max_age_secs).context("transfers request failed")?;
    parse_transfer_feed_json(&body)
}

pub fn fetch_price_history(url: &str, max_age_secs: u64) -> Result<PriceChangeHistory> {
    let client = http_client()?;
    let body =
        fetch_json_cached(client, url, max_age_secs).context("price changes request failed")?;
    parse_price_history_json(&body)
}

pub fn parse_bootstrap_json(raw: &str) -> Result<Bootstrap> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Bootstrap::default());
    }
    serde_json::from_str(trimmed).context("invalid bootstrap json")
}

pub fn parse_transfer_feed_json(raw: &str) -> Result<TransferFeed> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(TransferFeed::default());
    }
    serde_json::from_str(trimmed).context("invalid transfers json")
}

pub fn parse_price_history_json(raw: &str) -> Result<PriceChangeHistory> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(PriceChangeHistory::default());
    }
    serde_json::from_str(trimmed).context("invalid price changes json")
}

/// Builds one-sided transfer deltas from the bootstrap counts: the top `top_n`
/// players by event transfers in (with the out count zeroed) and the top
/// `top_n` by event transfers out (with the in count zeroed).
pub fn transfer_feed_from_bootstrap(bootstrap: &Bootstrap, top_n: usize) -> TransferFeed {
    let teams: HashMap<u32, &str> = bootstrap
        .teams
        .iter()
        .map(|t| (t.id, t.short_name.as_str()))
        .collect();
    let entry = |p: &BootstrapPlayer, tin: u64, tout: u64| TransferEntry {
        id: p.id,
        web_name: p.web_name.clone(),
        position: position_label(p.element_type).to_string(),
        team: teams
            .get(&p.team)
            .map(|s| s.to_string())
            .unwrap_or_else(|| p.team.to_string()),
        now_cost: p.now_cost,
        transfers_in_event: tin,
        transfers_out_event: tout,
    };

    let mut by_in: Vec<&BootstrapPlayer> = bootstrap
        .elements
        .iter()
        .filter(|p| p.transfers_in_event > 0)
        .collect();
    by_in.sort_by(|a, b| {
        b.transfers_in_event
            .cmp(&a.transfers_in_event)
            .then(a.id.cmp(&b.id))
    });

    let mut by_out: Vec<&BootstrapPlayer> = bootstrap
        .elements
        .iter()
        .filter(|p| p.transfers_out_event > 0)
        .collect();
    by_out.sort_by(|a, b| {
        b.transfers_out_event
            .cmp(&a.transfers_out_event)
            .then(a.id.cmp(&b.id))
    });

    TransferFeed {
        transfers_in: by_in
            .into_iter()
            .take(top_n)
            .map(|p| entry(p, p.transfers_in_event, 0))
            .collect(),
        transfers_out: by_out
            .into_iter()
            .take(top_n)
            .map(|p| entry(p, 0, p.transfers_out_event))
            .collect(),
    }
}

fn parse_decimal(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

// FPL encodes decimals as strings, but mirrors and fixtures sometimes carry bare
// numbers or nulls.
fn decimal_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}
