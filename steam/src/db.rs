//! SQLite bookkeeping for what the bot has seen and done: inventory items,
//! the listings it created and the market history.
use crate::price::Amount;
use crate::schema::{InventoryItem, ListOnMarket, MarketEvent, MyMarketListing};
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use time::OffsetDateTime;

const MAX_CONNECTIONS: u32 = 5;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS items (
        item_id TEXT PRIMARY KEY,
        market_hash_name TEXT NOT NULL,
        market_name TEXT NOT NULL,
        appid INTEGER NOT NULL,
        contextid TEXT NOT NULL,
        classid TEXT NOT NULL,
        instanceid TEXT NOT NULL,
        marketable BOOLEAN NOT NULL,
        tradable BOOLEAN NOT NULL,
        commodity BOOLEAN NOT NULL,
        last_seen TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS listings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id TEXT NOT NULL,
        market_hash_name TEXT NOT NULL,
        listing_id TEXT,
        you_receive INTEGER NOT NULL,
        buyer_pays INTEGER NOT NULL,
        status TEXT NOT NULL,
        listed_on TIMESTAMP NOT NULL,
        closed_on TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        listing_id TEXT NOT NULL,
        purchase_id TEXT,
        event_type TEXT NOT NULL,
        event_datetime TIMESTAMP NOT NULL,
        time_event_fraction INTEGER NOT NULL,
        steamid_actor TEXT NOT NULL,
        PRIMARY KEY (listing_id, event_type, event_datetime, time_event_fraction)
    )
    "#,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Delisted,
    Sold,
}

/// A listing the bot created, as recorded locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub id: i64,
    pub item_id: String,
    pub market_hash_name: String,
    /// Unknown until the listing shows up in a marketplace snapshot.
    pub listing_id: Option<String>,
    pub you_receive: Amount,
    pub buyer_pays: Amount,
    pub status: ListingStatus,
    pub listed_on: OffsetDateTime,
    pub closed_on: Option<OffsetDateTime>,
}

impl TryFrom<SqliteRow> for ListingRecord {
    type Error = Error;

    fn try_from(row: SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            market_hash_name: row.try_get("market_hash_name")?,
            listing_id: row.try_get("listing_id")?,
            you_receive: Amount::from_cents(row.try_get("you_receive")?),
            buyer_pays: Amount::from_cents(row.try_get("buyer_pays")?),
            status: status
                .parse()
                .map_err(|_| Error::InvariantViolation(format!("unknown listing status {status}")))?,
            listed_on: row.try_get("listed_on")?,
            closed_on: row.try_get("closed_on")?,
        })
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `url` and makes sure the
    /// tables exist.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // every connection to `sqlite::memory:` is a separate database
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            MAX_CONNECTIONS
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        log::info!("Connected to database {url}");
        Ok(Self { pool })
    }

    pub async fn store_items(&self, items: &[InventoryItem]) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO items (
                    item_id, market_hash_name, market_name, appid, contextid, classid,
                    instanceid, marketable, tradable, commodity, last_seen
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (item_id) DO UPDATE
                SET
                    marketable = excluded.marketable,
                    tradable = excluded.tradable,
                    last_seen = excluded.last_seen
                "#,
            )
            .bind(&item.item_id)
            .bind(&item.market_hash_name)
            .bind(&item.market_name)
            .bind(item.appid)
            .bind(&item.contextid)
            .bind(&item.classid)
            .bind(&item.instanceid)
            .bind(item.marketable)
            .bind(item.tradable)
            .bind(item.commodity)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Records a dispatched sell order and returns its local id.
    pub async fn insert_listing(&self, order: &ListOnMarket) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO listings (item_id, market_hash_name, you_receive, buyer_pays, status, listed_on)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&order.asset_id)
        .bind(&order.market_hash_name)
        .bind(order.you_receive.cents())
        .bind(order.buyer_pays.cents())
        .bind(ListingStatus::Active.to_string())
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Closes the active listing matching either id. Returns whether one matched.
    pub async fn mark_delisted(&self, listing_id: &str, item_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET status = $1, closed_on = $2
            WHERE status = $3 AND (listing_id = $4 OR item_id = $5)
            "#,
        )
        .bind(ListingStatus::Delisted.to_string())
        .bind(OffsetDateTime::now_utc())
        .bind(ListingStatus::Active.to_string())
        .bind(listing_id)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn active_listings(&self) -> Result<Vec<ListingRecord>> {
        sqlx::query("SELECT * FROM listings WHERE status = $1 ORDER BY id")
            .bind(ListingStatus::Active.to_string())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ListingRecord::try_from)
            .collect()
    }

    /// Reconciles local listings with a marketplace snapshot: listing ids are
    /// back-filled for listings that appear in it, and active listings whose
    /// asset is neither listed nor back in the inventory are marked sold.
    /// Returns the number marked sold.
    pub async fn update_sold_listings(
        &self,
        snapshot: &[MyMarketListing],
        inventory: &[InventoryItem],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for listing in snapshot {
            sqlx::query(
                r#"
                UPDATE listings
                SET listing_id = $1
                WHERE status = $2 AND listing_id IS NULL AND item_id = $3
                "#,
            )
            .bind(&listing.listing_id)
            .bind(ListingStatus::Active.to_string())
            .bind(&listing.description.item_id)
            .execute(&mut *tx)
            .await?;
        }

        let listing_ids: HashSet<&str> = snapshot.iter().map(|l| l.listing_id.as_str()).collect();
        let item_ids: HashSet<&str> = snapshot
            .iter()
            .map(|l| l.description.item_id.as_str())
            .chain(inventory.iter().map(|i| i.item_id.as_str()))
            .collect();

        let active: Vec<ListingRecord> =
            sqlx::query("SELECT * FROM listings WHERE status = $1")
                .bind(ListingStatus::Active.to_string())
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(ListingRecord::try_from)
                .collect::<Result<_>>()?;

        let now = OffsetDateTime::now_utc();
        let mut sold = 0;
        for record in active {
            let still_listed = item_ids.contains(record.item_id.as_str())
                || record
                    .listing_id
                    .as_deref()
                    .is_some_and(|id| listing_ids.contains(id));
            if still_listed {
                continue;
            }

            sqlx::query("UPDATE listings SET status = $1, closed_on = $2 WHERE id = $3")
                .bind(ListingStatus::Sold.to_string())
                .bind(now)
                .bind(record.id)
                .execute(&mut *tx)
                .await?;
            log::info!(
                "{} sold for {} (asset {})",
                record.market_hash_name,
                record.buyer_pays,
                record.item_id
            );
            sold += 1;
        }

        tx.commit().await?;
        Ok(sold)
    }

    /// Stores market history, ignoring events already recorded. Returns how
    /// many were new.
    pub async fn store_events(&self, events: &[MarketEvent]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO events (
                    listing_id, purchase_id, event_type, event_datetime,
                    time_event_fraction, steamid_actor
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&event.listing_id)
            .bind(&event.purchase_id)
            .bind(event.event_type.to_string())
            .bind(event.event_datetime)
            .bind(event.time_event_fraction)
            .bind(&event.steamid_actor)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MarketEventType;

    async fn db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn item(item_id: &str) -> InventoryItem {
        InventoryItem {
            item_id: item_id.into(),
            market_hash_name: "Recoil Case".into(),
            market_name: "Recoil Case".into(),
            appid: 730,
            contextid: "2".into(),
            classid: "4000".into(),
            instanceid: "0".into(),
            marketable: true,
            tradable: true,
            commodity: true,
            unowned_id: None,
        }
    }

    fn order(asset_id: &str) -> ListOnMarket {
        ListOnMarket {
            market_hash_name: "Recoil Case".into(),
            asset_id: asset_id.into(),
            you_receive: Amount::from_cents(158),
            buyer_pays: Amount::from_cents(180),
        }
    }

    fn on_market(listing_id: &str, asset_id: &str) -> MyMarketListing {
        MyMarketListing {
            listing_id: listing_id.into(),
            buyer_pay: Amount::from_cents(180),
            you_receive: Amount::from_cents(158),
            created_on: 0,
            description: item(asset_id),
        }
    }

    #[tokio::test]
    async fn test_store_items_upserts() {
        let db = db().await;
        db.store_items(&[item("1"), item("2")]).await.unwrap();

        let mut moved = item("1");
        moved.marketable = false;
        db.store_items(&[moved]).await.unwrap();

        let rows = sqlx::query("SELECT item_id, marketable FROM items ORDER BY item_id")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        let stored: Vec<(String, bool)> = rows
            .iter()
            .map(|row| (row.get("item_id"), row.get("marketable")))
            .collect();
        assert_eq!(stored, [("1".to_string(), false), ("2".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_listing_lifecycle() {
        let db = db().await;
        db.insert_listing(&order("1")).await.unwrap();
        db.insert_listing(&order("2")).await.unwrap();
        db.insert_listing(&order("3")).await.unwrap();

        // listing 2 is delisted, listing 3 disappears from the market
        assert!(db.mark_delisted("L2", "2").await.unwrap());
        let sold = db
            .update_sold_listings(&[on_market("L1", "1")], &[])
            .await
            .unwrap();
        assert_eq!(sold, 1);

        let active = db.active_listings().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].item_id, "1");
        assert_eq!(active[0].listing_id.as_deref(), Some("L1"));
        assert_eq!(active[0].buyer_pays, Amount::from_cents(180));
        assert_eq!(active[0].status, ListingStatus::Active);

        // a delisted listing is not delisted twice
        assert!(!db.mark_delisted("L2", "2").await.unwrap());
    }

    #[tokio::test]
    async fn test_sold_listings_matched_by_listing_id() {
        let db = db().await;
        db.insert_listing(&order("1")).await.unwrap();
        db.update_sold_listings(&[on_market("L1", "1")], &[])
            .await
            .unwrap();

        // the market may report a different asset id for the same listing
        let sold = db
            .update_sold_listings(&[on_market("L1", "99")], &[])
            .await
            .unwrap();
        assert_eq!(sold, 0);

        let sold = db.update_sold_listings(&[], &[]).await.unwrap();
        assert_eq!(sold, 1);
        assert!(db.active_listings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing_back_in_inventory_is_not_sold() {
        let db = db().await;
        db.insert_listing(&order("1")).await.unwrap();

        let sold = db.update_sold_listings(&[], &[item("1")]).await.unwrap();
        assert_eq!(sold, 0);
        assert_eq!(db.active_listings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_events_is_idempotent() {
        let db = db().await;
        let event = MarketEvent {
            listing_id: "L1".into(),
            purchase_id: Some("P1".into()),
            event_type: MarketEventType::ListingSold,
            event_datetime: OffsetDateTime::from_unix_timestamp(1_690_000_000).unwrap(),
            time_event_fraction: 0,
            steamid_actor: "76561198000000000".into(),
        };

        assert_eq!(db.store_events(&[event.clone()]).await.unwrap(), 1);
        assert_eq!(db.store_events(&[event]).await.unwrap(), 0);
    }
}
