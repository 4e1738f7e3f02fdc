use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const APP_USER_AGENT: &str = concat!("fpl_price_watch/", env!("CARGO_PKG_VERSION"));

static CLIENT: OnceCell<Client> = OnceCell::new();
static TIMEOUT_SECS: OnceCell<u64> = OnceCell::new();

/// Sets the request timeout used when the shared client is first built.
/// Has no effect once `http_client` has been called.
pub fn configure_timeout(secs: u64) {
    let _ = TIMEOUT_SECS.set(secs.clamp(1, 120));
}

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        let timeout = TIMEOUT_SECS.get().copied().unwrap_or(DEFAULT_TIMEOUT_SECS);
        Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build http client")
    })
}
