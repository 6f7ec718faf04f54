//! Inventory/listing reconciliation for the Steam Community market.
//!
//! The decision core ([`decision`], [`price`]) is pure and synchronous; the
//! rest moves snapshots in and orders out.
mod config;
pub mod db;
pub mod decision;
mod endpoint;
mod error;
mod exchange;
mod http;
pub mod market;
pub mod price;
mod rate_limiter;
pub mod schema;

pub use config::{Config, ItemToSell};
pub use db::Database;
pub use endpoint::Endpoint;
pub use error::Error;
pub use exchange::{get_items_to_delist, get_items_to_list, Exchange, ItemReport};
pub use http::SteamMarket;
pub use market::{market_factory, MarketProvider, MockMarket, RateLimitedMarket};
pub use rate_limiter::Limiter;

pub type Result<T> = std::result::Result<T, Error>;
