use std::env;
use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::fpl_fetch::FPL_API_BASE;
use crate::prediction::DEFAULT_MIN_TRANSFERS;
use crate::price_model::ModelParams;

const DEFAULT_TOP_N: usize = 50;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub api_base: String,
    pub transfers_url: Option<String>,
    pub price_changes_url: Option<String>,
    pub min_transfers: u64,
    pub top_n: usize,
    pub timeout_secs: u64,
    pub cache_max_age_secs: u64,
    pub model_params_path: Option<PathBuf>,
    pub ledger_enabled: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            api_base: FPL_API_BASE.to_string(),
            transfers_url: None,
            price_changes_url: None,
            min_transfers: DEFAULT_MIN_TRANSFERS,
            top_n: DEFAULT_TOP_N,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_max_age_secs: DEFAULT_CACHE_MAX_AGE_SECS,
            model_params_path: None,
            ledger_enabled: true,
        }
    }
}

impl WatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: env_string("FPL_API_BASE").unwrap_or(defaults.api_base),
            transfers_url: env_string("FPL_TRANSFERS_URL"),
            price_changes_url: env_string("FPL_PRICE_CHANGES_URL"),
            min_transfers: env_parse("PRICE_MIN_TRANSFERS")
                .unwrap_or(defaults.min_transfers)
                .min(5_000_000),
            top_n: env_parse("PRICE_TOP_N")
                .unwrap_or(defaults.top_n)
                .clamp(1, 1_000),
            timeout_secs: env_parse("HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.timeout_secs)
                .clamp(1, 120),
            cache_max_age_secs: env_parse("HTTP_CACHE_MAX_AGE_SECS")
                .unwrap_or(defaults.cache_max_age_secs)
                .min(86_400),
            model_params_path: env_string("PRICE_MODEL_PARAMS").map(PathBuf::from),
            ledger_enabled: env_bool("PRICE_LEDGER", defaults.ledger_enabled),
        }
    }

    /// Model parameters, with the JSON override applied when configured.
    pub fn model_params(&self) -> Result<ModelParams> {
        match self.model_params_path.as_deref() {
            Some(path) => {
                let params = ModelParams::load(path)?;
                info!(path = %path.display(), "loaded model params override");
                Ok(params)
            }
            None => Ok(ModelParams::default()),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse::<T>().ok())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
