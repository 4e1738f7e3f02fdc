use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelParams {
    pub base_up_threshold: f64,
    pub base_down_threshold: f64,
    pub ownership_up_exp: f64,
    pub ownership_down_exp: f64,
    pub flag_up_mult: FlagMultipliers,
    pub flag_down_mult: FlagMultipliers,
    pub cooldown_hours: i64,
    pub cooldown_damp: f64,
    pub recent_days_damp: i64,
    pub recent_up_damp: f64,
    pub recent_down_damp: f64,
    pub lambda_sigmoid: f64,
    pub time_weight_endgame: f64,
    pub min_active_managers: f64,
    pub signal_min_prob: f64,
    pub signal_min_margin: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FlagMultipliers {
    pub none: f64,
    pub yellow: f64,
    pub red: f64,
}

impl FlagMultipliers {
    pub fn for_flag(&self, flag: Flag) -> f64 {
        match flag {
            Flag::None => self.none,
            Flag::Yellow => self.yellow,
            Flag::Red => self.red,
        }
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            base_up_threshold: 3.0,
            base_down_threshold: 3.0,
            ownership_up_exp: 0.8,
            ownership_down_exp: 0.8,
            flag_up_mult: FlagMultipliers {
                none: 1.0,
                yellow: 0.9,
                red: 0.8,
            },
            flag_down_mult: FlagMultipliers {
                none: 1.0,
                yellow: 0.8,
                red: 0.6,
            },
            cooldown_hours: 24,
            cooldown_damp: 0.25,
            recent_days_damp: 7,
            recent_up_damp: 0.3,
            recent_down_damp: 0.3,
            lambda_sigmoid: 2.0,
            time_weight_endgame: 1.05,
            min_active_managers: 6_000_000.0,
            signal_min_prob: 0.85,
            signal_min_margin: 0.25,
        }
    }
}

impl ModelParams {
    /// Fields missing from the override file, nested ones included, keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read model params {}", path.display()))?;
        let overrides = serde_json::from_str(&raw).context("invalid model params json")?;
        Self::with_overrides(overrides)
    }

    pub fn with_overrides(overrides: Value) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        merge_json(&mut merged, overrides);
        serde_json::from_value(merged).context("invalid model params json")
    }
}

fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    #[default]
    None,
    Yellow,
    Red,
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flag::None => "none",
            Flag::Yellow => "yellow",
            Flag::Red => "red",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    LikelyUp,
    LikelyDown,
    Neutral,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::LikelyUp => "likely_up",
            Signal::LikelyDown => "likely_down",
            Signal::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionInputs {
    pub transfers_in_gw: u64,
    pub transfers_out_gw: u64,
    pub ownership_pct: f64,
    #[serde(default)]
    pub flag: Flag,
    #[serde(default)]
    pub last_price_change_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub price_change_dir_last: Option<Direction>,
    #[serde(default)]
    pub active_managers_estimate: f64,
    pub now: DateTime<Utc>,
    pub gw_start_at: DateTime<Utc>,
    pub gw_deadline_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub prob_up: f64,
    pub prob_down: f64,
    pub signal: Signal,
    // Final scores after cooldown, recency damping and time weighting.
    pub score_up: f64,
    pub score_down: f64,
    pub time_weight: f64,
    pub explanation: String,
}

// Ownership scales the manager base: popular players need more transfers.
pub fn normalize_transfers(
    count: u64,
    active_managers: f64,
    ownership_pct: f64,
    params: &ModelParams,
) -> f64 {
    let base = params.min_active_managers.max(active_managers);
    (count as f64 / base) / ownership_fraction(ownership_pct)
}

pub fn threshold_up(ownership_pct: f64, flag: Flag, params: &ModelParams) -> f64 {
    params.base_up_threshold
        * ownership_fraction(ownership_pct).powf(params.ownership_up_exp)
        * params.flag_up_mult.for_flag(flag)
}

pub fn threshold_down(ownership_pct: f64, flag: Flag, params: &ModelParams) -> f64 {
    params.base_down_threshold
        * ownership_fraction(ownership_pct).powf(params.ownership_down_exp)
        * params.flag_down_mult.for_flag(flag)
}

pub fn time_weight(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    deadline: DateTime<Utc>,
    params: &ModelParams,
) -> f64 {
    if deadline <= start || now < start || now > deadline {
        return 1.0;
    }
    let total = (deadline - start).num_milliseconds() as f64;
    let elapsed = (now - start).num_milliseconds() as f64;
    let frac = (elapsed / total).clamp(0.0, 1.0);
    1.0 + (params.time_weight_endgame - 1.0) * frac
}

pub fn sigmoid(score: f64, lambda: f64) -> f64 {
    let p = 1.0 / (1.0 + (-lambda * score).exp());
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}

pub fn classify_signal(prob_up: f64, prob_down: f64, params: &ModelParams) -> Signal {
    if prob_up >= params.signal_min_prob && prob_up - prob_down >= params.signal_min_margin {
        Signal::LikelyUp
    } else if prob_down >= params.signal_min_prob
        && prob_down - prob_up >= params.signal_min_margin
    {
        Signal::LikelyDown
    } else {
        Signal::Neutral
    }
}

pub fn estimate_price_change_prob(
    inputs: &PredictionInputs,
    params: &ModelParams,
) -> PredictionResult {
    let own = inputs.ownership_pct;
    let norm_in = normalize_transfers(
        inputs.transfers_in_gw,
        inputs.active_managers_estimate,
        own,
        params,
    );
    let norm_out = normalize_transfers(
        inputs.transfers_out_gw,
        inputs.active_managers_estimate,
        own,
        params,
    );

    let th_up = threshold_up(own, inputs.flag, params);
    let th_down = threshold_down(own, inputs.flag, params);

    let mut score_up = ratio_score(norm_in, th_up);
    let mut score_down = ratio_score(norm_out, th_down);

    let since_change = inputs
        .last_price_change_at
        .map(|at| inputs.now - at)
        .filter(|age| *age >= ChronoDuration::zero());
    // Spans too large for a TimeDelta cover every past change.
    let within = |limit: Option<ChronoDuration>| {
        since_change.is_some_and(|age| limit.is_none_or(|limit| age <= limit))
    };

    if within(ChronoDuration::try_hours(params.cooldown_hours)) {
        score_up *= params.cooldown_damp;
        score_down *= params.cooldown_damp;
    }

    let recent = within(ChronoDuration::try_days(params.recent_days_damp));
    if recent {
        match inputs.price_change_dir_last {
            Some(Direction::Up) => score_up *= params.recent_up_damp,
            Some(Direction::Down) => score_down *= params.recent_down_damp,
            None => {}
        }
    }

    let weight = time_weight(inputs.now, inputs.gw_start_at, inputs.gw_deadline_at, params);
    score_up *= weight;
    score_down *= weight;

    let prob_up = sigmoid(score_up, params.lambda_sigmoid);
    let prob_down = sigmoid(score_down, params.lambda_sigmoid);
    let signal = classify_signal(prob_up, prob_down, params);

    let explanation = format!(
        "normIn={norm_in:.4} normOut={norm_out:.4} thUp={th_up:.4} thDown={th_down:.4} \
         scoreUp={score_up:.3} scoreDown={score_down:.3} flag={} own={own:.1}% \
         recent={recent} timeW={weight:.3}",
        inputs.flag
    );

    PredictionResult {
        prob_up,
        prob_down,
        signal,
        score_up,
        score_down,
        time_weight: weight,
        explanation,
    }
}

fn ownership_fraction(ownership_pct: f64) -> f64 {
    let frac = ownership_pct / 100.0;
    if frac.is_finite() { frac.max(0.01) } else { 0.01 }
}

// A threshold can only collapse to zero through a zeroed multiplier in a custom
// parameter set; treat it as "never reached" rather than dividing by zero.
fn ratio_score(normalized: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 || !threshold.is_finite() {
        return -1.0;
    }
    normalized / threshold - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn ownership_floor_applies_below_one_percent() {
        let p = ModelParams::default();
        let a = normalize_transfers(60_000, 0.0, 0.2, &p);
        let b = normalize_transfers(60_000, 0.0, 1.0, &p);
        assert!((a - b).abs() < 1e-12);
        assert!((b - 1.0).abs() < 1e-12);
    }

    #[test]
    fn active_managers_estimate_only_raises_the_base() {
        let p = ModelParams::default();
        let floor = normalize_transfers(600_000, 1_000.0, 10.0, &p);
        let bigger = normalize_transfers(600_000, 12_000_000.0, 10.0, &p);
        assert!((floor - 1.0).abs() < 1e-12);
        assert!((bigger - 0.5).abs() < 1e-12);
    }

    #[test]
    fn flags_lower_thresholds() {
        let p = ModelParams::default();
        let none = threshold_down(20.0, Flag::None, &p);
        let red = threshold_down(20.0, Flag::Red, &p);
        assert!((red / none - 0.6).abs() < 1e-12);
        let yellow_up = threshold_up(20.0, Flag::Yellow, &p);
        assert!((yellow_up / threshold_up(20.0, Flag::None, &p) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn time_weight_ramps_inside_window_only() {
        let p = ModelParams::default();
        assert_eq!(time_weight(at(1, 0), at(1, 0), at(11, 0), &p), 1.0);
        assert!((time_weight(at(6, 0), at(1, 0), at(11, 0), &p) - 1.025).abs() < 1e-9);
        assert!((time_weight(at(11, 0), at(1, 0), at(11, 0), &p) - 1.05).abs() < 1e-9);
        assert_eq!(time_weight(at(12, 0), at(1, 0), at(11, 0), &p), 1.0);
        assert_eq!(time_weight(at(5, 0), at(11, 0), at(1, 0), &p), 1.0);
    }

    #[test]
    fn sigmoid_is_half_at_threshold_and_saturates() {
        assert!((sigmoid(0.0, 2.0) - 0.5).abs() < 1e-12);
        assert_eq!(sigmoid(1_000.0, 2.0), 1.0);
        assert_eq!(sigmoid(-1_000.0, 2.0), 0.0);
    }

    #[test]
    fn zeroed_flag_multiplier_does_not_divide_by_zero() {
        let mut p = ModelParams::default();
        p.flag_down_mult.red = 0.0;
        let inputs = PredictionInputs {
            transfers_in_gw: 0,
            transfers_out_gw: 500_000,
            ownership_pct: 10.0,
            flag: Flag::Red,
            last_price_change_at: None,
            price_change_dir_last: None,
            active_managers_estimate: 0.0,
            now: at(20, 0),
            gw_start_at: at(1, 0),
            gw_deadline_at: at(2, 0),
        };
        let out = estimate_price_change_prob(&inputs, &p);
        assert!(out.prob_down.is_finite());
        assert_eq!(out.signal, Signal::Neutral);
    }

    #[test]
    fn explanation_lists_intermediates() {
        let inputs = PredictionInputs {
            transfers_in_gw: 100_000,
            transfers_out_gw: 0,
            ownership_pct: 12.5,
            flag: Flag::Yellow,
            last_price_change_at: None,
            price_change_dir_last: None,
            active_managers_estimate: 0.0,
            now: at(3, 0),
            gw_start_at: at(1, 0),
            gw_deadline_at: at(8, 0),
        };
        let out = estimate_price_change_prob(&inputs, &ModelParams::default());
        let keys = [
            "normIn=",
            "thDown=",
            "scoreUp=",
            "flag=yellow",
            "own=12.5%",
            "recent=false",
            "timeW=",
        ];
        for key in keys {
            assert!(out.explanation.contains(key), "missing {key} in {}", out.explanation);
        }
    }

    #[test]
    fn partial_params_json_keeps_defaults() {
        let p: ModelParams = serde_json::from_str(r#"{"lambda_sigmoid": 3.5}"#).unwrap();
        assert_eq!(p.lambda_sigmoid, 3.5);
        assert_eq!(p.base_up_threshold, 3.0);
        assert_eq!(p.flag_down_mult.red, 0.6);
    }

    #[test]
    fn single_flag_multiplier_override_keeps_the_rest() {
        let overrides = serde_json::json!({"flag_down_mult": {"red": 0.5}, "cooldown_hours": 12});
        let p = ModelParams::with_overrides(overrides).expect("partial flags should load");
        let defaults = ModelParams::default();
        assert_eq!(p.flag_down_mult.red, 0.5);
        assert_eq!(p.flag_down_mult.yellow, 0.8);
        assert_eq!(p.flag_down_mult.none, 1.0);
        assert_eq!(p.flag_up_mult, defaults.flag_up_mult);
        assert_eq!(p.cooldown_hours, 12);
        assert_eq!(p.lambda_sigmoid, defaults.lambda_sigmoid);

        let bad = serde_json::json!({"flag_up_mult": {"red": "low"}});
        assert!(ModelParams::with_overrides(bad).is_err());
    }

    #[test]
    fn oversized_damping_windows_cover_any_past_change() {
        let mut p = ModelParams::default();
        p.cooldown_hours = i64::MAX / 10;
        p.recent_days_damp = i64::MAX / 10;
        let mut inputs = PredictionInputs {
            transfers_in_gw: 300_000,
            transfers_out_gw: 0,
            ownership_pct: 5.0,
            flag: Flag::None,
            last_price_change_at: Some(at(1, 0)),
            price_change_dir_last: Some(Direction::Up),
            active_managers_estimate: 0.0,
            now: at(30, 0),
            gw_start_at: at(1, 0),
            gw_deadline_at: at(2, 0),
        };
        let damped = estimate_price_change_prob(&inputs, &p);
        inputs.last_price_change_at = None;
        let plain = estimate_price_change_prob(&inputs, &p);

        assert!(damped.explanation.contains("recent=true"));
        let factor = p.cooldown_damp * p.recent_up_damp;
        assert!((damped.score_up - plain.score_up * factor).abs() < 1e-9);
        assert!(damped.prob_up < plain.prob_up);
    }
}
