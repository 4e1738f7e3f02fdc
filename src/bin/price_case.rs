use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use fpl_price_watch::logging;
use fpl_price_watch::price_model::{self, ModelParams, PredictionInputs};

#[derive(Debug, serde::Deserialize)]
struct PriceCase {
    #[serde(default)]
    label: Option<String>,
    inputs: PredictionInputs,
    #[serde(default)]
    params: Option<serde_json::Value>,
}

fn main() -> Result<()> {
    logging::init();
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tests/fixtures/price_case.json"));

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("read case file {}", path.display()))?;
    let case: PriceCase = serde_json::from_str(&raw).context("invalid case json")?;
    let params = match case.params {
        Some(overrides) => ModelParams::with_overrides(overrides)?,
        None => ModelParams::default(),
    };

    // Offline single-case evaluation for tuning the constants.
    let result = price_model::estimate_price_change_prob(&case.inputs, &params);

    if let Some(label) = case.label {
        println!("Case: {label}");
    }
    println!("P(up):   {:.3}", result.prob_up);
    println!("P(down): {:.3}", result.prob_down);
    println!("Signal:  {}", result.signal.as_str());
    println!("Detail:  {}", result.explanation);

    Ok(())
}
