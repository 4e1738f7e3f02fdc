use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::WatchConfig;
use crate::fpl_fetch::{
    self, Bootstrap, PriceChangeHistory, TransferFeed, transfer_feed_from_bootstrap,
};
use crate::prediction::{self, PredictionReport, ReportOptions};
use crate::price_history::{self, PriceLedger};
use crate::price_model::ModelParams;

/// The three upstream inputs of one prediction cycle.
#[derive(Debug, Clone, Default)]
pub struct FeedBundle {
    pub bootstrap: Bootstrap,
    pub transfers: TransferFeed,
    pub history: Option<PriceChangeHistory>,
}

// Bootstrap and transfer failures fail the cycle. A history failure only costs
// the cooldown and recency damping.
pub fn fetch_all(config: &WatchConfig) -> Result<FeedBundle> {
    let max_age = config.cache_max_age_secs;
    let (bootstrap, (transfers, history)) = rayon::join(
        || fpl_fetch::fetch_bootstrap(&config.api_base, max_age),
        || {
            rayon::join(
                || {
                    config
                        .transfers_url
                        .as_deref()
                        .map(|url| fpl_fetch::fetch_transfer_feed(url, max_age))
                        .transpose()
                },
                || {
                    config
                        .price_changes_url
                        .as_deref()
                        .map(|url| fpl_fetch::fetch_price_history(url, max_age))
                        .transpose()
                },
            )
        },
    );

    let bootstrap = bootstrap.context("bootstrap fetch failed")?;
    let transfers = match transfers.context("transfers fetch failed")? {
        Some(feed) => feed,
        None => transfer_feed_from_bootstrap(&bootstrap, config.top_n),
    };
    let history = history.unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "price history unavailable, predicting without it");
        None
    });

    info!(
        players = bootstrap.elements.len(),
        transfers_in = transfers.transfers_in.len(),
        transfers_out = transfers.transfers_out.len(),
        history = history.as_ref().map(|h| h.risers.len() + h.fallers.len()),
        "feeds loaded"
    );

    Ok(FeedBundle {
        bootstrap,
        transfers,
        history,
    })
}

/// With a ledger, price moves visible in this snapshot are recorded first and
/// merged into the remote history.
pub fn predict_cycle(
    bundle: &FeedBundle,
    ledger: Option<&mut PriceLedger>,
    params: &ModelParams,
    options: &ReportOptions,
    now: DateTime<Utc>,
) -> PredictionReport {
    let local = ledger.map(|ledger| {
        let recorded = ledger.observe(&bundle.bootstrap, now);
        if recorded > 0 {
            info!(recorded, "price changes recorded in local ledger");
        }
        ledger.as_history()
    });
    let history = price_history::merge_history(bundle.history.as_ref(), local.as_ref());

    prediction::build_report(
        &bundle.bootstrap,
        &bundle.transfers,
        history.as_ref(),
        params,
        options,
        now,
    )
}
