//! The reconciliation loop: snapshot the market, decide per tracked item,
//! dispatch, record.
use crate::config::{Config, ItemToSell};
use crate::db::Database;
use crate::decision::{ListDelistActions, ListingState};
use crate::market::{market_factory, MarketProvider};
use crate::price::{get_steam_fees_object, Amount};
use crate::schema::{DelistFromMarket, InventoryItem, ListOnMarket, MyMarketListing};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

const EVENTS_PAGE_SIZE: usize = 100;
const MAX_EVENT_PAGES: usize = 10;

/// The first `qty` marketable assets called `name`, lowest asset id first,
/// priced to show `price` to buyers.
pub fn get_items_to_list(
    name: &str,
    qty: usize,
    price: Amount,
    inventory: &[InventoryItem],
) -> Result<Vec<ListOnMarket>> {
    if qty == 0 {
        return Ok(Vec::new());
    }

    let fees = get_steam_fees_object(price)?;
    let mut candidates: Vec<&InventoryItem> = inventory
        .iter()
        .filter(|item| item.market_hash_name == name && item.marketable)
        .collect();
    candidates.sort_by(|a, b| {
        (a.item_id.len(), &a.item_id).cmp(&(b.item_id.len(), &b.item_id))
    });

    if candidates.len() < qty {
        return Err(Error::InvariantViolation(format!(
            "{name}: asked to list {qty}, only {} marketable in inventory",
            candidates.len()
        )));
    }

    Ok(candidates
        .into_iter()
        .take(qty)
        .map(|item| ListOnMarket {
            market_hash_name: name.to_string(),
            asset_id: item.item_id.clone(),
            you_receive: fees.you_receive,
            buyer_pays: fees.listed_price(),
        })
        .collect())
}

/// The first `qty` of our listings of `name`, in marketplace order.
pub fn get_items_to_delist(
    name: &str,
    qty: usize,
    listings: &[MyMarketListing],
) -> Result<Vec<DelistFromMarket>> {
    let selected: Vec<DelistFromMarket> = listings
        .iter()
        .filter(|listing| listing.description.market_hash_name == name)
        .take(qty)
        .map(|listing| DelistFromMarket {
            market_hash_name: name.to_string(),
            listing_id: listing.listing_id.clone(),
            item_id: listing.description.item_id.clone(),
            unowned_item_id: listing.description.unowned_id.clone(),
        })
        .collect();

    if selected.len() < qty {
        return Err(Error::InvariantViolation(format!(
            "{name}: asked to delist {qty}, only {} listed",
            selected.len()
        )));
    }

    Ok(selected)
}

/// Outcome of one pass for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub market_hash_name: String,
    pub actions: ListDelistActions,
    pub delisted: usize,
    pub listed: usize,
}

struct Plan {
    name: String,
    actions: ListDelistActions,
    delists: Vec<DelistFromMarket>,
    lists: Vec<ListOnMarket>,
}

#[derive(Clone)]
pub struct Exchange {
    config: Arc<Config>,
    market: Arc<dyn MarketProvider>,
    db: Database,
    /// Held for the duration of a sell pass.
    pass: Arc<Mutex<()>>,
}

impl Exchange {
    pub fn new(config: Arc<Config>, market: Arc<dyn MarketProvider>, db: Database) -> Self {
        Self {
            config,
            market,
            db,
            pass: Arc::new(Mutex::new(())),
        }
    }

    pub async fn from_config(config: Config) -> Result<Self> {
        let market = market_factory(&config)?;
        let db = Database::new(config.db_url()).await?;
        Ok(Self::new(Arc::new(config), market, db))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The price to undercut with: one cent below the higher of the lowest
    /// and the median price.
    pub async fn get_item_price(&self, market_hash_name: &str) -> Result<Amount> {
        let overview = self.market.get_item_price(market_hash_name).await?;
        let price = overview.lowest()?.max(overview.median()?);
        Ok(price - Amount::from_cents(1))
    }

    /// Runs one reconciliation pass over every tracked item.
    ///
    /// All decisions are taken against the same snapshot before anything is
    /// dispatched. An item whose price or decision fails is skipped; an
    /// internal invariant violation aborts the pass before any order goes out.
    /// A pass that starts while another is running does nothing.
    pub async fn sell_loop(&self) -> Result<Vec<ItemReport>> {
        let Ok(_pass) = self.pass.try_lock() else {
            log::warn!("Previous sell pass is still running, skipping");
            return Ok(Vec::new());
        };

        let listings = self.market.get_my_market_listings().await?;
        let inventory = self.market.get_my_inventory().await?;

        self.db.store_items(&inventory).await?;
        let sold = self.db.update_sold_listings(&listings, &inventory).await?;
        if sold > 0 {
            log::info!("{sold} listings sold since the last pass");
        }

        let mut plans = Vec::new();
        for (name, target) in &self.config.items_to_sell {
            match self.plan_item(name, target, &listings, &inventory).await {
                Ok(plan) => plans.push(plan),
                Err(e @ Error::InvariantViolation(_)) => return Err(e),
                Err(e) => log::error!("Skipping {name}: {e}"),
            }
        }

        let mut reports = Vec::with_capacity(plans.len());
        for plan in plans {
            reports.push(self.dispatch(plan).await);
        }
        Ok(reports)
    }

    async fn plan_item(
        &self,
        name: &str,
        target: &ItemToSell,
        listings: &[MyMarketListing],
        inventory: &[InventoryItem],
    ) -> Result<Plan> {
        let own: Vec<&MyMarketListing> = listings
            .iter()
            .filter(|l| l.description.market_hash_name == name)
            .collect();
        let in_inventory = inventory
            .iter()
            .filter(|i| i.market_hash_name == name && i.marketable)
            .count();

        let state = ListingState {
            market_listings: own.len(),
            min_price_on_market: own.iter().map(|l| l.buyer_pay).min().unwrap_or_default(),
            in_inventory,
            target_sell_count: target.quantity,
            reference_price: self.get_item_price(name).await?,
            price_floor: target.min_price,
        };

        let actions = state.actions()?;
        log::info!("{name} {actions}");

        Ok(Plan {
            name: name.to_string(),
            actions,
            delists: get_items_to_delist(name, actions.delist.qty, listings)?,
            lists: get_items_to_list(name, actions.list.qty, actions.list.price, inventory)?,
        })
    }

    /// Delists first, then lists. The first failing order ends the item.
    async fn dispatch(&self, plan: Plan) -> ItemReport {
        let mut report = ItemReport {
            market_hash_name: plan.name,
            actions: plan.actions,
            delisted: 0,
            listed: 0,
        };

        for order in &plan.delists {
            match self.delist(order).await {
                Ok(()) => report.delisted += 1,
                Err(e) => {
                    log::error!("Failed to delist {}: {e}", order.listing_id);
                    return report;
                }
            }
        }

        for order in &plan.lists {
            match self.list(order).await {
                Ok(()) => report.listed += 1,
                Err(e) => {
                    log::error!("Failed to list asset {}: {e}", order.asset_id);
                    return report;
                }
            }
        }

        report
    }

    async fn delist(&self, order: &DelistFromMarket) -> Result<()> {
        self.market.cancel_sell_order(&order.listing_id).await?;
        self.db
            .mark_delisted(&order.listing_id, &order.item_id)
            .await?;
        log::info!(
            "Delisted {} (listing {})",
            order.market_hash_name,
            order.listing_id
        );
        Ok(())
    }

    async fn list(&self, order: &ListOnMarket) -> Result<()> {
        self.market
            .create_sell_order(&order.asset_id, order.you_receive)
            .await?;
        self.db.insert_listing(order).await?;
        log::info!(
            "Listed {} (asset {}) at {}, receiving {}",
            order.market_hash_name,
            order.asset_id,
            order.buyer_pays,
            order.you_receive
        );
        Ok(())
    }

    /// Pulls market history until a page brings nothing new. Returns how many
    /// events were stored.
    pub async fn sync_market_events(&self) -> Result<u64> {
        let mut stored = 0;
        for page in 0..MAX_EVENT_PAGES {
            let events = self
                .market
                .get_market_events(page * EVENTS_PAGE_SIZE, EVENTS_PAGE_SIZE)
                .await?;
            let new = self.db.store_events(&events).await?;
            stored += new;

            if new == 0 || events.len() < EVENTS_PAGE_SIZE {
                break;
            }
        }

        log::info!("Stored {stored} new market events");
        Ok(stored)
    }
}
