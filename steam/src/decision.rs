//! Listing/delisting decisions for one tracked item.
//!
//! Pure functions over a [`ListingState`] snapshot. They never retry or clamp
//! bad input: malformed configuration surfaces as [`Error::InvalidArgument`],
//! and an inconsistent result as [`Error::InvariantViolation`].
use crate::price::{get_steam_fees_object, Amount};
use crate::{Error, Result};
use std::fmt;

/// How many listings to create or cancel, and at which buyer price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub qty: usize,
    pub price: Amount,
}

impl Action {
    pub fn new(qty: usize, price: Amount) -> Self {
        Self { qty, price }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.qty, self.price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListDelistActions {
    pub delist: Action,
    pub list: Action,
}

impl ListDelistActions {
    pub fn is_noop(&self) -> bool {
        self.delist.qty == 0 && self.list.qty == 0
    }
}

impl fmt::Display for ListDelistActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delist {}, list {}", self.delist, self.list)
    }
}

/// Everything the engine needs to know about one item, taken fresh each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingState {
    pub market_listings: usize,
    /// Lowest buyer price among our own listings, zero when there are none.
    pub min_price_on_market: Amount,
    pub in_inventory: usize,
    pub target_sell_count: usize,
    pub reference_price: Amount,
    pub price_floor: Amount,
}

impl ListingState {
    pub fn actions(&self) -> Result<ListDelistActions> {
        actions_to_make_list_delist(
            self.market_listings,
            self.min_price_on_market,
            self.target_sell_count,
            self.in_inventory,
            self.reference_price,
            self.price_floor,
        )
    }
}

fn ensure_positive(name: &str, price: Amount) -> Result<()> {
    if price.is_positive() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "{name} must be positive, got {price}"
        )))
    }
}

/// How many items can go on sale to reach `number_to_sell`, given what is
/// already listed and what is left in the inventory.
pub fn how_many_can_list(
    num_market_listings: usize,
    number_to_sell: usize,
    num_in_inventory: usize,
) -> usize {
    number_to_sell
        .saturating_sub(num_market_listings)
        .min(num_in_inventory)
}

/// Decides how many active listings to cancel. The returned price is the
/// current lowest listing price and is informational only.
pub fn determine_delists(
    market_listings: usize,
    min_price_market_listing: Amount,
    max_on_sale: usize,
    tot_in_inventory: usize,
    usual_price: Amount,
    min_allowed_price: Amount,
) -> Result<Action> {
    ensure_positive("usual price", usual_price)?;
    ensure_positive("minimum allowed price", min_allowed_price)?;
    if market_listings > 0 {
        ensure_positive("lowest listing price", min_price_market_listing)?;
    } else if min_price_market_listing < Amount::ZERO {
        return Err(Error::InvalidArgument(format!(
            "lowest listing price must not be negative, got {min_price_market_listing}"
        )));
    }

    let can_list_more = tot_in_inventory > 0 && market_listings < max_on_sale;
    let excess = market_listings.saturating_sub(max_on_sale);

    let qty = if market_listings == 0 {
        0
    } else if max_on_sale == 0 {
        market_listings
    } else if min_price_market_listing == min_allowed_price {
        excess
    } else if can_list_more {
        // Room to add from the inventory; only mispriced listings go.
        if min_price_market_listing < min_allowed_price {
            market_listings
        } else {
            0
        }
    } else {
        let cheapest_and_acceptable = usual_price >= min_price_market_listing
            && min_price_market_listing >= min_allowed_price;
        if cheapest_and_acceptable {
            excess
        } else {
            market_listings
        }
    };

    Ok(Action::new(qty, min_price_market_listing))
}

/// Decides how many inventory items to put on sale once `market_listings`
/// (already reduced by the delists) remain. Never prices below the floor.
pub fn determine_lists(
    market_listings: usize,
    max_on_sale: usize,
    tot_in_inventory: usize,
    usual_price: Amount,
    min_allowed_price: Amount,
) -> Result<Action> {
    ensure_positive("usual price", usual_price)?;
    ensure_positive("minimum allowed price", min_allowed_price)?;

    let can_list_more = tot_in_inventory > 0 && market_listings < max_on_sale;
    let qty = if can_list_more {
        how_many_can_list(market_listings, max_on_sale, tot_in_inventory)
    } else {
        0
    };

    Ok(Action::new(qty, usual_price.max(min_allowed_price)))
}

/// Delist-then-list recommendation for one item.
///
/// The floor is first lowered to the price the market would actually display
/// for it, so a floor the fee schedule cannot hit does not make listings at
/// the floor look underpriced on the next pass.
pub fn actions_to_make_list_delist(
    num_market_listings: usize,
    min_price_mark_listing: Amount,
    num_to_sell: usize,
    num_in_inventory: usize,
    item_selling_price: Amount,
    min_allowed_price: Amount,
) -> Result<ListDelistActions> {
    ensure_positive("minimum allowed price", min_allowed_price)?;
    let fees = get_steam_fees_object(min_allowed_price)?;
    let min_allowed_price = min_allowed_price.min(fees.listed_price());

    let delist = determine_delists(
        num_market_listings,
        min_price_mark_listing,
        num_to_sell,
        num_in_inventory,
        item_selling_price,
        min_allowed_price,
    )?;

    let remaining = num_market_listings.checked_sub(delist.qty).ok_or_else(|| {
        Error::InvariantViolation(format!(
            "delisting {} of {num_market_listings} listings",
            delist.qty
        ))
    })?;

    let list = determine_lists(
        remaining,
        num_to_sell,
        num_in_inventory,
        item_selling_price,
        min_allowed_price,
    )?;

    if remaining + list.qty > num_to_sell {
        return Err(Error::InvariantViolation(format!(
            "{remaining} remaining + {} new listings exceed the target of {num_to_sell}",
            list.qty
        )));
    }

    Ok(ListDelistActions { delist, list })
}
