use strum_macros::Display;

/// Steam Community endpoints the bot talks to.
#[derive(Display, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    #[strum(serialize = "/market/priceoverview/")]
    PriceOverview,
    #[strum(serialize = "/market/mylistings/")]
    MyListings,
    #[strum(serialize = "/market/sellitem/")]
    SellItem,
    #[strum(serialize = "/market/removelisting")]
    RemoveListing,
    #[strum(serialize = "/market/myhistory/render/")]
    MyHistory,
    #[strum(serialize = "/inventory")]
    Inventory,
}

impl Endpoint {
    /// Whether the marketplace throttles this endpoint.
    pub fn is_rate_limited(self) -> bool {
        !matches!(self, Endpoint::Inventory)
    }
}
