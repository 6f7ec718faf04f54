//! The marketplace seam: one async trait, an in-memory provider for debug runs
//! and tests, and a proxy that puts the rate limiter in front of the calls the
//! marketplace throttles.
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::http::SteamMarket;
use crate::price::{buyer_price, Amount};
use crate::rate_limiter::Limiter;
use crate::schema::{
    Currency, HistoryResponse, InventoryItem, InventoryResponse, ListingsResponse, MarketEvent,
    MyMarketListing, PriceOverview,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

const INVENTORY_FILE: &str = "get_my_inventory.json";
const LISTINGS_FILE: &str = "get_my_market_listings.json";
const PRICE_FILE: &str = "get_item_price.json";
const EVENTS_FILE: &str = "get_market_events.json";

#[async_trait]
pub trait MarketProvider: Send + Sync {
    fn currency(&self) -> Currency;

    async fn get_my_inventory(&self) -> Result<Vec<InventoryItem>>;

    async fn get_my_market_listings(&self) -> Result<Vec<MyMarketListing>>;

    async fn get_item_price(&self, market_hash_name: &str) -> Result<PriceOverview>;

    /// Puts one asset on sale; `money_to_receive` is the seller's payout.
    async fn create_sell_order(&self, asset_id: &str, money_to_receive: Amount) -> Result<()>;

    async fn cancel_sell_order(&self, listing_id: &str) -> Result<()>;

    async fn get_market_events(&self, start: usize, count: usize) -> Result<Vec<MarketEvent>>;
}

/// Debug builds talk to the fixtures, everything else to the live market.
pub fn market_factory(config: &Config) -> Result<Arc<dyn MarketProvider>> {
    if config.debug {
        log::info!(
            "Debug mode: using mocked market from {}",
            config.api_responses_dir.display()
        );
        Ok(Arc::new(MockMarket::from_dir(
            &config.api_responses_dir,
            config.currency,
        )?))
    } else {
        Ok(Arc::new(RateLimitedMarket::new(SteamMarket::new(config)?)))
    }
}

/// Orders the mock has accepted, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    Sell { asset_id: String, you_receive: Amount },
    Cancel { listing_id: String },
}

#[derive(Default)]
struct MockState {
    inventory: Vec<InventoryItem>,
    listings: Vec<MyMarketListing>,
    next_listing_id: u64,
    orders: Vec<Order>,
}

pub struct MockMarket {
    currency: Currency,
    price: PriceOverview,
    events: Vec<MarketEvent>,
    state: Mutex<MockState>,
}

impl MockMarket {
    pub fn new(
        currency: Currency,
        inventory: Vec<InventoryItem>,
        listings: Vec<MyMarketListing>,
        price: PriceOverview,
        events: Vec<MarketEvent>,
    ) -> Self {
        Self {
            currency,
            price,
            events,
            state: Mutex::new(MockState {
                inventory,
                listings,
                next_listing_id: 1,
                orders: Vec::new(),
            }),
        }
    }

    /// Loads the raw marketplace documents saved under `dir`.
    pub fn from_dir(dir: impl AsRef<Path>, currency: Currency) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |file: &str| fs::read_to_string(dir.join(file));

        let inventory: InventoryResponse = serde_json::from_str(&read(INVENTORY_FILE)?)?;
        let listings: ListingsResponse = serde_json::from_str(&read(LISTINGS_FILE)?)?;
        let price: PriceOverview = serde_json::from_str(&read(PRICE_FILE)?)?;
        let events: HistoryResponse = serde_json::from_str(&read(EVENTS_FILE)?)?;

        Ok(Self::new(
            currency,
            inventory.into_items(),
            listings.into_listings(),
            price,
            events.into_events()?,
        ))
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.clone()
    }

    /// A buyer takes the listing off the market.
    pub async fn purchase(&self, listing_id: &str) -> Option<MyMarketListing> {
        let mut state = self.state.lock().await;
        let index = state
            .listings
            .iter()
            .position(|l| l.listing_id == listing_id)?;
        Some(state.listings.remove(index))
    }
}

#[async_trait]
impl MarketProvider for MockMarket {
    fn currency(&self) -> Currency {
        self.currency
    }

    async fn get_my_inventory(&self) -> Result<Vec<InventoryItem>> {
        Ok(self.state.lock().await.inventory.clone())
    }

    async fn get_my_market_listings(&self) -> Result<Vec<MyMarketListing>> {
        Ok(self.state.lock().await.listings.clone())
    }

    async fn get_item_price(&self, _market_hash_name: &str) -> Result<PriceOverview> {
        Ok(self.price.clone())
    }

    async fn create_sell_order(&self, asset_id: &str, money_to_receive: Amount) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state
            .inventory
            .iter()
            .position(|item| item.item_id == asset_id && item.marketable)
            .ok_or_else(|| Error::Api(format!("no marketable asset {asset_id} in inventory")))?;

        let item = state.inventory.remove(index);
        let listing_id = format!("mock-{}", state.next_listing_id);
        state.next_listing_id += 1;
        state.listings.push(MyMarketListing {
            listing_id,
            buyer_pay: buyer_price(money_to_receive),
            you_receive: money_to_receive,
            created_on: OffsetDateTime::now_utc().unix_timestamp(),
            description: item,
        });
        state.orders.push(Order::Sell {
            asset_id: asset_id.to_string(),
            you_receive: money_to_receive,
        });
        Ok(())
    }

    async fn cancel_sell_order(&self, listing_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state
            .listings
            .iter()
            .position(|l| l.listing_id == listing_id)
            .ok_or_else(|| Error::Api(format!("no listing {listing_id}")))?;

        let listing = state.listings.remove(index);
        state.inventory.push(listing.description);
        state.orders.push(Order::Cancel {
            listing_id: listing_id.to_string(),
        });
        Ok(())
    }

    async fn get_market_events(&self, start: usize, count: usize) -> Result<Vec<MarketEvent>> {
        Ok(self.events.iter().skip(start).take(count).cloned().collect())
    }
}

/// Applies a [`Limiter`] to every call of the wrapped provider; the limiter
/// lets the unthrottled inventory endpoint straight through.
pub struct RateLimitedMarket<M> {
    inner: M,
    limiter: Limiter,
}

impl<M: MarketProvider> RateLimitedMarket<M> {
    pub fn new(inner: M) -> Self {
        Self::with_limiter(inner, Limiter::default())
    }

    pub fn with_limiter(inner: M, limiter: Limiter) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<M: MarketProvider> MarketProvider for RateLimitedMarket<M> {
    fn currency(&self) -> Currency {
        self.inner.currency()
    }

    async fn get_my_inventory(&self) -> Result<Vec<InventoryItem>> {
        self.limiter.acquire(Endpoint::Inventory).await?;
        self.inner.get_my_inventory().await
    }

    async fn get_my_market_listings(&self) -> Result<Vec<MyMarketListing>> {
        self.limiter.acquire(Endpoint::MyListings).await?;
        self.inner.get_my_market_listings().await
    }

    async fn get_item_price(&self, market_hash_name: &str) -> Result<PriceOverview> {
        self.limiter.acquire(Endpoint::PriceOverview).await?;
        self.inner.get_item_price(market_hash_name).await
    }

    async fn create_sell_order(&self, asset_id: &str, money_to_receive: Amount) -> Result<()> {
        self.limiter.acquire(Endpoint::SellItem).await?;
        self.inner.create_sell_order(asset_id, money_to_receive).await
    }

    async fn cancel_sell_order(&self, listing_id: &str) -> Result<()> {
        self.limiter.acquire(Endpoint::RemoveListing).await?;
        self.inner.cancel_sell_order(listing_id).await
    }

    async fn get_market_events(&self, start: usize, count: usize) -> Result<Vec<MarketEvent>> {
        self.limiter.acquire(Endpoint::MyHistory).await?;
        self.inner.get_market_events(start, count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, Instant};

    fn fixtures() -> MockMarket {
        MockMarket::from_dir(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("api_responses"),
            Currency::Eur,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_mock_loads_fixtures() {
        let market = fixtures();

        assert_eq!(market.get_my_inventory().await.unwrap().len(), 5);
        assert_eq!(market.get_my_market_listings().await.unwrap().len(), 3);
        assert_eq!(market.get_market_events(0, 100).await.unwrap().len(), 3);
        assert_eq!(market.get_market_events(1, 1).await.unwrap().len(), 1);

        let price = market.get_item_price("Recoil Case").await.unwrap();
        assert_eq!(price.lowest().unwrap(), Amount::from_cents(181));
    }

    #[tokio::test]
    async fn test_mock_sell_moves_item_to_listings() {
        let market = fixtures();

        market
            .create_sell_order("30000000001", Amount::from_cents(158))
            .await
            .unwrap();

        let inventory = market.get_my_inventory().await.unwrap();
        assert!(inventory.iter().all(|i| i.item_id != "30000000001"));

        let listings = market.get_my_market_listings().await.unwrap();
        let listing = listings
            .iter()
            .find(|l| l.description.item_id == "30000000001")
            .unwrap();
        assert_eq!(listing.you_receive, Amount::from_cents(158));
        assert_eq!(listing.buyer_pay, Amount::from_cents(180));

        assert_eq!(
            market.orders().await,
            vec![Order::Sell {
                asset_id: "30000000001".into(),
                you_receive: Amount::from_cents(158),
            }]
        );
    }

    #[tokio::test]
    async fn test_mock_cancel_moves_item_back() {
        let market = fixtures();

        market.cancel_sell_order("5000000000000000001").await.unwrap();

        assert_eq!(market.get_my_market_listings().await.unwrap().len(), 2);
        let inventory = market.get_my_inventory().await.unwrap();
        assert!(inventory.iter().any(|i| i.item_id == "30000000101"));
    }

    #[tokio::test]
    async fn test_mock_rejects_unknown_orders() {
        let market = fixtures();

        // storage unit is not marketable
        assert!(market
            .create_sell_order("30000000005", Amount::from_cents(100))
            .await
            .is_err());
        assert!(market.cancel_sell_order("missing").await.is_err());
        assert!(market.orders().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_market_throttles_network_calls() {
        let market = RateLimitedMarket::new(fixtures());
        let start = Instant::now();

        market.get_my_inventory().await.unwrap();
        market.get_my_inventory().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        market.get_item_price("Recoil Case").await.unwrap();
        market.get_my_market_listings().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn test_factory_picks_mock_in_debug() {
        let mut config: Config = serde_json::from_str("{}").unwrap();
        config.api_responses_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("api_responses");

        let market = market_factory(&config).unwrap();
        assert_eq!(market.currency(), Currency::Eur);
    }
}
