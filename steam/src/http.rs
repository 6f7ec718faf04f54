use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::market::MarketProvider;
use crate::price::Amount;
use crate::schema::{
    Currency, HistoryResponse, InventoryItem, InventoryResponse, ListingsResponse, MarketEvent,
    MyMarketListing, PriceOverview, CS2_APP_ID, CS2_CONTEXT_ID,
};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

const BASE_URL: &str = "https://steamcommunity.com";
const LISTINGS_PAGE_SIZE: usize = 100;
const INVENTORY_PAGE_SIZE: usize = 2000;

#[derive(Serialize)]
struct PriceQuery<'a> {
    appid: u32,
    currency: u8,
    market_hash_name: &'a str,
}

#[derive(Serialize)]
struct PageQuery {
    norender: u8,
    start: usize,
    count: usize,
}

#[derive(Serialize)]
struct InventoryQuery<'a> {
    l: &'a str,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_assetid: Option<&'a str>,
}

#[derive(Serialize)]
struct SellForm<'a> {
    sessionid: &'a str,
    appid: u32,
    contextid: &'a str,
    assetid: &'a str,
    amount: u32,
    price: i64,
}

#[derive(Serialize)]
struct SessionForm<'a> {
    sessionid: &'a str,
}

#[derive(Deserialize)]
struct SellResponse {
    success: bool,
    message: Option<String>,
}

/// Live client for the Steam Community market, authenticated with the cookies
/// of an already logged-in session.
pub struct SteamMarket {
    client: reqwest::Client,
    base_url: Url,
    steam_id: String,
    currency: Currency,
    session_id: String,
    login_secure: String,
}

impl SteamMarket {
    /// Session cookies come from `STEAM_SESSION_ID` and `STEAM_LOGIN_SECURE`.
    pub fn new(config: &Config) -> Result<Self> {
        let steam_id = config
            .steam_id
            .clone()
            .ok_or_else(|| Error::Config("steam_id is required for the live market".into()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Url::parse(BASE_URL)?,
            steam_id,
            currency: config.currency,
            session_id: env::var("STEAM_SESSION_ID")?,
            login_secure: env::var("STEAM_LOGIN_SECURE")?,
        })
    }

    fn url(&self, path: &str, query: &impl Serialize) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        url.set_query(Some(&serde_qs::to_string(query)?));
        Ok(url)
    }

    fn cookie(&self) -> String {
        format!(
            "sessionid={}; steamLoginSecure={}",
            self.session_id, self.login_secure
        )
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.header(COOKIE, self.cookie()).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else {
            Err(Error::Response(status, response.text().await?))
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(self.client.get(url)).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post(&self, path: &str, form: &impl Serialize) -> Result<Response> {
        let url = self.base_url.join(path)?;
        let referer = format!("{BASE_URL}/profiles/{}/inventory", self.steam_id);
        let builder = self
            .client
            .post(url)
            .header(REFERER, referer)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(serde_qs::to_string(form)?);

        self.send(builder).await
    }
}

#[async_trait]
impl MarketProvider for SteamMarket {
    fn currency(&self) -> Currency {
        self.currency
    }

    async fn get_my_inventory(&self) -> Result<Vec<InventoryItem>> {
        let path = format!(
            "{}/{}/{CS2_APP_ID}/{CS2_CONTEXT_ID}",
            Endpoint::Inventory,
            self.steam_id
        );

        let mut items = Vec::new();
        let mut start_assetid: Option<String> = None;
        loop {
            let query = InventoryQuery {
                l: "english",
                count: INVENTORY_PAGE_SIZE,
                start_assetid: start_assetid.as_deref(),
            };
            let page: InventoryResponse = self.get(self.url(&path, &query)?).await?;
            let more_items = page.more_items;
            start_assetid = page.last_assetid.clone();
            items.extend(page.into_items());

            if !more_items || start_assetid.is_none() {
                break;
            }
        }

        log::debug!("Fetched {} inventory items", items.len());
        Ok(items)
    }

    async fn get_my_market_listings(&self) -> Result<Vec<MyMarketListing>> {
        let mut listings = Vec::new();
        let mut start = 0;
        loop {
            let query = PageQuery {
                norender: 1,
                start,
                count: LISTINGS_PAGE_SIZE,
            };
            let url = self.url(&Endpoint::MyListings.to_string(), &query)?;
            let mut page: ListingsResponse = self.get(url).await?;

            // every page repeats the unconfirmed listings
            if start > 0 {
                page.listings_to_confirm.clear();
            }
            let received = page.listings.len();
            let total = page.total_count;
            listings.extend(page.into_listings());

            start += received;
            if received == 0 || start >= total {
                break;
            }
        }

        Ok(listings)
    }

    async fn get_item_price(&self, market_hash_name: &str) -> Result<PriceOverview> {
        let query = PriceQuery {
            appid: CS2_APP_ID,
            currency: self.currency.code(),
            market_hash_name,
        };
        let overview: PriceOverview = self
            .get(self.url(&Endpoint::PriceOverview.to_string(), &query)?)
            .await?;

        if overview.success {
            Ok(overview)
        } else {
            Err(Error::Api(format!("no price overview for {market_hash_name}")))
        }
    }

    async fn create_sell_order(&self, asset_id: &str, money_to_receive: Amount) -> Result<()> {
        let form = SellForm {
            sessionid: &self.session_id,
            appid: CS2_APP_ID,
            contextid: CS2_CONTEXT_ID,
            assetid: asset_id,
            amount: 1,
            price: money_to_receive.cents(),
        };
        let response: SellResponse = self
            .post(&Endpoint::SellItem.to_string(), &form)
            .await?
            .json()
            .await?;

        if response.success {
            Ok(())
        } else {
            Err(Error::Api(response.message.unwrap_or_else(|| {
                format!("sell order for asset {asset_id} was refused")
            })))
        }
    }

    async fn cancel_sell_order(&self, listing_id: &str) -> Result<()> {
        let path = format!("{}/{listing_id}", Endpoint::RemoveListing);
        let form = SessionForm {
            sessionid: &self.session_id,
        };
        self.post(&path, &form).await?;
        Ok(())
    }

    async fn get_market_events(&self, start: usize, count: usize) -> Result<Vec<MarketEvent>> {
        let query = PageQuery {
            norender: 1,
            start,
            count,
        };
        let history: HistoryResponse = self
            .get(self.url(&Endpoint::MyHistory.to_string(), &query)?)
            .await?;
        history.into_events()
    }
}
