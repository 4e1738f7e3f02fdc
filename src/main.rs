use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use fpl_price_watch::config::WatchConfig;
use fpl_price_watch::prediction::{PlayerPrediction, PredictionReport, ReportOptions};
use fpl_price_watch::{demo_feed, feed, http_client, logging, price_history};

const DEFAULT_LIMIT: usize = 15;
const DEFAULT_DEMO_SEED: u64 = 2024;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init();

    let config = WatchConfig::from_env();
    let params = config.model_params()?;
    http_client::configure_timeout(config.timeout_secs);

    let demo = has_flag("--demo");
    let as_json = has_flag("--json");
    let use_ledger = config.ledger_enabled && !demo && !has_flag("--no-ledger");
    let limit = parse_arg::<usize>("--limit").unwrap_or(DEFAULT_LIMIT).max(1);
    let now = Utc::now();

    let bundle = if demo {
        let seed = parse_arg::<u64>("--seed").unwrap_or(DEFAULT_DEMO_SEED);
        info!(seed, "using demo feed");
        demo_feed::demo_bundle(seed, now)
    } else {
        feed::fetch_all(&config).context("prediction cycle aborted")?
    };

    let mut ledger = use_ledger.then(price_history::load_ledger);
    let options = ReportOptions {
        min_transfers: config.min_transfers,
        window: None,
    };
    let report = feed::predict_cycle(&bundle, ledger.as_mut(), &params, &options, now);
    if let Some(ledger) = ledger.as_ref() {
        if let Err(err) = price_history::save_ledger(ledger) {
            warn!(error = %format!("{err:#}"), "price ledger not saved");
        }
    }

    if as_json {
        let json = serde_json::to_string_pretty(&report).context("serialize report")?;
        println!("{json}");
    } else {
        print_report(&report, limit);
    }
    Ok(())
}

fn print_report(report: &PredictionReport, limit: usize) {
    println!(
        "FPL price predictions ({}, {}) - {} candidates",
        report.algorithm, report.accuracy, report.total_predictions
    );
    println!(
        "Updated {}  Next update {}",
        report.last_updated.format("%Y-%m-%d %H:%M UTC"),
        report.next_update.format("%Y-%m-%d %H:%M UTC")
    );

    println!();
    println!("Risers");
    print_rows(&report.risers, limit);
    println!();
    println!("Fallers");
    print_rows(&report.fallers, limit);
}

fn print_rows(rows: &[PlayerPrediction], limit: usize) {
    if rows.is_empty() {
        println!("  (none)");
        return;
    }
    println!(
        "  {:<16} {:<4} {:<4} {:>6} {:>6} {:>9} {:>6} {:>6} {:>7} {:>8}",
        "Player", "Pos", "Team", "Price", "Own%", "Transfers", "P(up)", "P(dn)", "Prog%", "When"
    );
    for p in rows.iter().take(limit) {
        let transfers = p.transfers_in_event.max(p.transfers_out_event);
        println!(
            "  {:<16} {:<4} {:<4} {:>6.1} {:>6.1} {:>9} {:>6.2} {:>6.2} {:>7.1} {:>8}{}",
            truncate(&p.web_name, 16),
            p.position,
            p.team,
            p.price(),
            p.ownership_pct,
            transfers,
            p.prob_up,
            p.prob_down,
            p.progress,
            p.change_time.label(),
            if p.target_reached { " *" } else { "" }
        );
    }
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == flag)
}

fn parse_arg<T: std::str::FromStr>(name: &str) -> Option<T> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            return value.trim().parse().ok();
        }
        if arg == name {
            return args.get(idx + 1).and_then(|v| v.trim().parse().ok());
        }
    }
    None
}
