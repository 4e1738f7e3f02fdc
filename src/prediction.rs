use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::Serialize;

use crate::fpl_fetch::{
    Bootstrap, BootstrapPlayer, ChangeType, GameweekEvent, PriceChangeHistory, PriceChangeRecord,
    TransferEntry, TransferFeed,
};
use crate::price_model::{self, Direction, Flag, ModelParams, PredictionInputs, Signal};

pub const ALGORITHM_VERSION: &str = "transfer-pressure-v1";
pub const ACCURACY_LABEL: &str = "heuristic";
pub const DEFAULT_MIN_TRANSFERS: u64 = 20_000;

const NEUTRAL_PROGRESS: f64 = 95.0;
const MAX_HOURLY_CHANGE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameweekWindow {
    pub start: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl GameweekWindow {
    pub fn synthesized(now: DateTime<Utc>) -> Self {
        Self {
            start: now - ChronoDuration::days(2),
            deadline: now + ChronoDuration::days(5),
        }
    }

    // Current event deadline to next event deadline, else the synthesized span.
    pub fn from_events(events: &[GameweekEvent], now: DateTime<Utc>) -> Self {
        let start = events
            .iter()
            .find(|e| e.is_current)
            .and_then(|e| e.deadline_time);
        let deadline = events.iter().find(|e| e.is_next).and_then(|e| e.deadline_time);
        match (start, deadline) {
            (Some(start), Some(deadline)) if start < deadline => Self { start, deadline },
            _ => Self::synthesized(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeTime {
    Tonight,
    Tomorrow,
    #[serde(rename = "2 days")]
    TwoDays,
    #[serde(rename = ">2 days")]
    Later,
    Unlikely,
}

impl ChangeTime {
    fn from_strength(strength: f64) -> Self {
        if strength >= 105.0 {
            ChangeTime::Tonight
        } else if strength >= 102.0 {
            ChangeTime::Tomorrow
        } else if strength >= 98.0 {
            ChangeTime::TwoDays
        } else {
            ChangeTime::Later
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChangeTime::Tonight => "Tonight",
            ChangeTime::Tomorrow => "Tomorrow",
            ChangeTime::TwoDays => "2 days",
            ChangeTime::Later => ">2 days",
            ChangeTime::Unlikely => "Unlikely",
        }
    }
}

impl fmt::Display for ChangeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerPrediction {
    pub id: u32,
    pub web_name: String,
    pub position: String,
    pub team: String,
    pub now_cost: i32,
    pub ownership_pct: f64,
    pub form: f64,
    pub total_points: i32,
    pub transfers_in_event: u64,
    pub transfers_out_event: u64,
    pub trend: Trend,
    pub prob_up: f64,
    pub prob_down: f64,
    pub signal: Signal,
    pub progress: f64,
    pub hourly_change: f64,
    pub change_time: ChangeTime,
    pub target_reached: bool,
    pub explanation: String,
}

impl PlayerPrediction {
    fn unmatched(entry: &TransferEntry) -> Self {
        Self {
            id: entry.id,
            web_name: entry.web_name.clone(),
            position: entry.position.clone(),
            team: entry.team.clone(),
            now_cost: entry.now_cost,
            ownership_pct: 0.0,
            form: 0.0,
            total_points: 0,
            transfers_in_event: entry.transfers_in_event,
            transfers_out_event: entry.transfers_out_event,
            trend: Trend::Flat,
            prob_up: 0.0,
            prob_down: 0.0,
            signal: Signal::Neutral,
            progress: 100.0,
            hourly_change: 0.0,
            change_time: ChangeTime::Unlikely,
            target_reached: false,
            explanation: "no bootstrap record".to_string(),
        }
    }

    pub fn price(&self) -> f64 {
        self.now_cost as f64 / 10.0
    }
}

#[derive(Debug, Clone)]
pub struct PredictionContext<'a> {
    pub players: &'a HashMap<u32, BootstrapPlayer>,
    pub history: Option<&'a PriceChangeHistory>,
    pub window: GameweekWindow,
    pub active_managers_estimate: f64,
    pub params: &'a ModelParams,
    pub now: DateTime<Utc>,
}

pub fn index_players(bootstrap: &Bootstrap) -> HashMap<u32, BootstrapPlayer> {
    bootstrap
        .elements
        .iter()
        .map(|p| (p.id, p.clone()))
        .collect()
}

pub fn flag_from_status(status: Option<&str>) -> Flag {
    match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("d") => Flag::Yellow,
        Some("i" | "s" | "u" | "n") => Flag::Red,
        _ => Flag::None,
    }
}

pub fn latest_change_for(
    player_id: u32,
    history: &PriceChangeHistory,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> Option<&PriceChangeRecord> {
    // No horizon when the lookback reaches past the representable range.
    let horizon = ChronoDuration::try_days(lookback_days).and_then(|d| now.checked_sub_signed(d));
    history
        .records()
        .filter(|r| r.player_id == player_id)
        .filter(|r| r.change_time <= now && horizon.is_none_or(|h| r.change_time >= h))
        .max_by_key(|r| r.change_time)
}

pub fn predict_player(entry: &TransferEntry, ctx: &PredictionContext<'_>) -> PlayerPrediction {
    let Some(player) = ctx.players.get(&entry.id) else {
        return PlayerPrediction::unmatched(entry);
    };

    let is_riser = entry.transfers_in_event > 0 && entry.transfers_out_event == 0;
    let is_faller = entry.transfers_out_event > 0 && entry.transfers_in_event == 0;

    let last_change = ctx
        .history
        .and_then(|h| latest_change_for(entry.id, h, ctx.now, ctx.params.recent_days_damp));

    let inputs = PredictionInputs {
        transfers_in_gw: entry.transfers_in_event,
        transfers_out_gw: entry.transfers_out_event,
        ownership_pct: player.ownership_pct(),
        flag: flag_from_status(player.status.as_deref()),
        last_price_change_at: last_change.map(|r| r.change_time),
        price_change_dir_last: last_change.map(|r| match r.change_type {
            ChangeType::Rise => Direction::Up,
            ChangeType::Fall => Direction::Down,
        }),
        active_managers_estimate: ctx.active_managers_estimate,
        now: ctx.now,
        gw_start_at: ctx.window.start,
        gw_deadline_at: ctx.window.deadline,
    };
    let result = price_model::estimate_price_change_prob(&inputs, ctx.params);
    let (pu, pd) = (result.prob_up, result.prob_down);
    let rate = (pu.max(pd) * 0.2).min(MAX_HOURLY_CHANGE);

    // Faller progress mirrors the riser scale around 100 so that the strongest
    // fallers sort lowest; `strength` is the unmirrored value.
    let (trend, progress, strength, hourly_change) = if is_riser {
        let p = if result.signal == Signal::LikelyUp {
            100.0 + pu * 8.0
        } else {
            88.0 + pu * 12.0
        };
        (Trend::Rising, p, p, rate)
    } else if is_faller {
        let s = if result.signal == Signal::LikelyDown {
            100.0 + pd * 8.0
        } else {
            88.0 + pd * 12.0
        };
        (Trend::Falling, 200.0 - s, s, -rate)
    } else {
        (Trend::Flat, NEUTRAL_PROGRESS, NEUTRAL_PROGRESS, 0.0)
    };

    PlayerPrediction {
        id: entry.id,
        web_name: non_empty_or(&entry.web_name, &player.web_name),
        position: entry.position.clone(),
        team: entry.team.clone(),
        now_cost: if entry.now_cost > 0 {
            entry.now_cost
        } else {
            player.now_cost
        },
        ownership_pct: player.ownership_pct(),
        form: player.form_rating(),
        total_points: player.total_points,
        transfers_in_event: entry.transfers_in_event,
        transfers_out_event: entry.transfers_out_event,
        trend,
        prob_up: pu,
        prob_down: pd,
        signal: result.signal,
        progress,
        hourly_change,
        change_time: ChangeTime::from_strength(strength),
        target_reached: result.signal != Signal::Neutral,
        explanation: result.explanation,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport {
    pub predictions: Vec<PlayerPrediction>,
    pub risers: Vec<PlayerPrediction>,
    pub fallers: Vec<PlayerPrediction>,
    pub total_predictions: usize,
    pub accuracy: String,
    pub last_updated: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub algorithm: String,
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Display cutoff on the transfer count in the candidate's direction.
    pub min_transfers: u64,
    pub window: Option<GameweekWindow>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            min_transfers: DEFAULT_MIN_TRANSFERS,
            window: None,
        }
    }
}

pub fn build_report(
    bootstrap: &Bootstrap,
    transfers: &TransferFeed,
    history: Option<&PriceChangeHistory>,
    params: &ModelParams,
    options: &ReportOptions,
    now: DateTime<Utc>,
) -> PredictionReport {
    let players = index_players(bootstrap);
    let ctx = PredictionContext {
        players: &players,
        history,
        window: options
            .window
            .unwrap_or_else(|| GameweekWindow::from_events(&bootstrap.events, now)),
        active_managers_estimate: bootstrap.total_players.unwrap_or(0) as f64,
        params,
        now,
    };

    let mut seen = HashSet::new();
    let candidates = transfers
        .transfers_in
        .iter()
        .filter(|e| e.transfers_in_event >= options.min_transfers)
        .chain(
            transfers
                .transfers_out
                .iter()
                .filter(|e| e.transfers_out_event >= options.min_transfers),
        )
        .filter(|e| seen.insert(e.id));

    let predictions: Vec<PlayerPrediction> =
        candidates.map(|entry| predict_player(entry, &ctx)).collect();

    let mut risers: Vec<PlayerPrediction> = predictions
        .iter()
        .filter(|p| p.trend == Trend::Rising)
        .cloned()
        .collect();
    risers.sort_by(|a, b| b.progress.total_cmp(&a.progress).then(a.id.cmp(&b.id)));

    let mut fallers: Vec<PlayerPrediction> = predictions
        .iter()
        .filter(|p| p.trend == Trend::Falling)
        .cloned()
        .collect();
    fallers.sort_by(|a, b| a.progress.total_cmp(&b.progress).then(a.id.cmp(&b.id)));

    PredictionReport {
        total_predictions: predictions.len(),
        predictions,
        risers,
        fallers,
        accuracy: ACCURACY_LABEL.to_string(),
        last_updated: now,
        next_update: next_update_after(now),
        algorithm: ALGORITHM_VERSION.to_string(),
    }
}

pub fn next_update_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(NaiveTime::MIN).and_utc() + ChronoDuration::minutes(90);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

fn non_empty_or(primary: &str, fallback: &str) -> String {
    if primary.trim().is_empty() {
        fallback.to_string()
    } else {
        primary.to_string()
    }
}
