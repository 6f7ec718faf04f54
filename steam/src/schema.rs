use crate::price::{convert_price_string, Amount};
use crate::Result;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use strum_macros::Display;
use time::OffsetDateTime;

pub const CS2_APP_ID: u32 = 730;
pub const CS2_CONTEXT_ID: &str = "2";

/// Wallet currencies, discriminants are the marketplace's currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Currency {
    Usd = 1,
    Gbp = 2,
    #[default]
    Eur = 3,
    Rub = 5,
}

impl Currency {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The marketplace sends flags as `0`/`1` in some places and booleans in others.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub item_id: String,
    pub market_hash_name: String,
    pub market_name: String,
    pub appid: u32,
    pub contextid: String,
    pub classid: String,
    pub instanceid: String,
    pub marketable: bool,
    pub tradable: bool,
    pub commodity: bool,
    pub unowned_id: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct InventoryResponse {
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub descriptions: Vec<Description>,
    pub last_assetid: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub more_items: bool,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Asset {
    pub appid: u32,
    pub contextid: String,
    pub assetid: String,
    pub classid: String,
    pub instanceid: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Description {
    pub classid: String,
    pub instanceid: String,
    pub market_hash_name: String,
    #[serde(default)]
    pub market_name: String,
    #[serde(deserialize_with = "flag")]
    pub marketable: bool,
    #[serde(deserialize_with = "flag")]
    pub tradable: bool,
    #[serde(default, deserialize_with = "flag")]
    pub commodity: bool,
}

impl InventoryResponse {
    /// Joins every asset with its description; assets without one are dropped.
    pub(crate) fn into_items(self) -> Vec<InventoryItem> {
        let descriptions: HashMap<(&str, &str), &Description> = self
            .descriptions
            .iter()
            .map(|d| ((d.classid.as_str(), d.instanceid.as_str()), d))
            .collect();

        self.assets
            .iter()
            .filter_map(|asset| {
                let Some(description) =
                    descriptions.get(&(asset.classid.as_str(), asset.instanceid.as_str()))
                else {
                    log::warn!("No description for asset {}, skipping", asset.assetid);
                    return None;
                };
                Some(InventoryItem {
                    item_id: asset.assetid.clone(),
                    market_hash_name: description.market_hash_name.clone(),
                    market_name: description.market_name.clone(),
                    appid: asset.appid,
                    contextid: asset.contextid.clone(),
                    classid: asset.classid.clone(),
                    instanceid: asset.instanceid.clone(),
                    marketable: description.marketable,
                    tradable: description.tradable,
                    commodity: description.commodity,
                    unowned_id: None,
                })
            })
            .collect()
    }
}

/// One of our own sell listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MyMarketListing {
    pub listing_id: String,
    pub buyer_pay: Amount,
    pub you_receive: Amount,
    pub created_on: i64,
    pub description: InventoryItem,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ListingsResponse {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub listings: Vec<RawListing>,
    #[serde(default)]
    pub listings_to_confirm: Vec<RawListing>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawListing {
    pub listingid: String,
    #[serde(default)]
    pub time_created: i64,
    pub asset: ListingAsset,
    /// What the seller receives, in cents.
    pub price: i64,
    pub fee: i64,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ListingAsset {
    pub appid: u32,
    pub contextid: String,
    pub id: String,
    pub classid: String,
    pub instanceid: String,
    pub market_hash_name: String,
    #[serde(default)]
    pub market_name: String,
    #[serde(default, deserialize_with = "flag")]
    pub marketable: bool,
    #[serde(default, deserialize_with = "flag")]
    pub tradable: bool,
    #[serde(default, deserialize_with = "flag")]
    pub commodity: bool,
    pub unowned_id: Option<String>,
}

impl From<RawListing> for MyMarketListing {
    fn from(listing: RawListing) -> Self {
        let asset = listing.asset;
        Self {
            listing_id: listing.listingid,
            buyer_pay: Amount::from_cents(listing.price + listing.fee),
            you_receive: Amount::from_cents(listing.price),
            created_on: listing.time_created,
            description: InventoryItem {
                item_id: asset.id,
                market_hash_name: asset.market_hash_name,
                market_name: asset.market_name,
                appid: asset.appid,
                contextid: asset.contextid,
                classid: asset.classid,
                instanceid: asset.instanceid,
                marketable: asset.marketable,
                tradable: asset.tradable,
                commodity: asset.commodity,
                unowned_id: asset.unowned_id,
            },
        }
    }
}

impl ListingsResponse {
    /// Active listings followed by the ones still waiting for confirmation.
    pub(crate) fn into_listings(self) -> Vec<MyMarketListing> {
        self.listings
            .into_iter()
            .chain(self.listings_to_confirm)
            .map(MyMarketListing::from)
            .collect()
    }
}

/// Price summary for one item, e.g.
/// `{"success":true,"lowest_price":"6,70€","volume":"7","median_price":"6,70€"}`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PriceOverview {
    pub success: bool,
    pub lowest_price: Option<String>,
    pub median_price: Option<String>,
    pub volume: Option<String>,
}

impl PriceOverview {
    pub fn lowest(&self) -> Result<Amount> {
        convert_price_string(self.lowest_price.as_deref().unwrap_or_default())
    }

    pub fn median(&self) -> Result<Amount> {
        convert_price_string(self.median_price.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MarketEventType {
    ListingCreated = 1,
    ListingCancelled = 2,
    ListingSold = 3,
    ListingPurchased = 4,
}

impl TryFrom<u8> for MarketEventType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ListingCreated),
            2 => Ok(Self::ListingCancelled),
            3 => Ok(Self::ListingSold),
            4 => Ok(Self::ListingPurchased),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketEvent {
    pub listing_id: String,
    pub purchase_id: Option<String>,
    pub event_type: MarketEventType,
    pub event_datetime: OffsetDateTime,
    pub time_event_fraction: i64,
    pub steamid_actor: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct HistoryResponse {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawEvent {
    pub listingid: String,
    pub purchaseid: Option<String>,
    pub event_type: u8,
    pub time_event: i64,
    #[serde(default)]
    pub time_event_fraction: i64,
    pub steamid_actor: String,
}

impl HistoryResponse {
    pub(crate) fn into_events(self) -> Result<Vec<MarketEvent>> {
        let mut events = Vec::with_capacity(self.events.len());
        for raw in self.events {
            let Ok(event_type) = MarketEventType::try_from(raw.event_type) else {
                log::debug!("Skipping unknown market event type {}", raw.event_type);
                continue;
            };
            events.push(MarketEvent {
                listing_id: raw.listingid,
                purchase_id: raw.purchaseid,
                event_type,
                event_datetime: OffsetDateTime::from_unix_timestamp(raw.time_event)?,
                time_event_fraction: raw.time_event_fraction,
                steamid_actor: raw.steamid_actor,
            });
        }
        Ok(events)
    }
}

/// A sell order ready to dispatch: the asset and both sides of its price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOnMarket {
    pub market_hash_name: String,
    pub asset_id: String,
    pub you_receive: Amount,
    pub buyer_pays: Amount,
}

/// A listing to cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelistFromMarket {
    pub market_hash_name: String,
    pub listing_id: String,
    pub item_id: String,
    pub unowned_item_id: Option<String>,
}
