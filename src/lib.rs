pub mod config;
pub mod demo_feed;
pub mod feed;
pub mod fpl_fetch;
pub mod http_cache;
pub mod http_client;
pub mod logging;
pub mod prediction;
pub mod price_history;
pub mod price_model;
