use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ClaimStore, RateStore, ShopStore, StoreError};
use crate::models::{ClaimToken, NewClaimToken, NewShop, Rate, RateQuote, Shop, ShopUpdate};
use crate::ranking::{self, Candidate, NearbyQuery, RankedShop};

const CLAIM_COLUMNS: &str = "id, token_hash, correlation_id, latitude, longitude, expires_at, \
                             used_at, bound_shop_id, issued_by_admin_id, created_at";

const SHOP_COLUMNS: &str = "id, name, latitude, longitude, contact, hours, owner_user_id, \
                            verified, created_at, modified_at";

const RATE_COLUMNS: &str = "id, shop_id, from_currency, to_currency, buy_rate, sell_rate, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Constraint violations become `Conflict`; everything else stays a database error.
fn map_db_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    if matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) {
        return StoreError::Unavailable(err.to_string());
    }
    StoreError::Database(err)
}

// -- Claim Token Operations --

#[async_trait]
impl ClaimStore for PgStore {
    async fn insert_claim(&self, claim: &NewClaimToken) -> Result<ClaimToken, StoreError> {
        let sql = format!(
            "INSERT INTO claim_tokens (token_hash, correlation_id, latitude, longitude, expires_at, issued_by_admin_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            CLAIM_COLUMNS
        );
        sqlx::query_as::<_, ClaimToken>(&sql)
            .bind(&claim.token_hash)
            .bind(claim.correlation_id)
            .bind(claim.latitude)
            .bind(claim.longitude)
            .bind(claim.expires_at)
            .bind(claim.issued_by_admin_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<ClaimToken>, StoreError> {
        let sql = format!("SELECT {} FROM claim_tokens WHERE correlation_id = $1", CLAIM_COLUMNS);
        sqlx::query_as::<_, ClaimToken>(&sql)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn mark_used(
        &self,
        record_id: i64,
        shop_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The predicate and the write are one statement; row locking picks a single winner.
        let result = sqlx::query(
            "UPDATE claim_tokens SET used_at = $3, bound_shop_id = $2
             WHERE id = $1 AND used_at IS NULL",
        )
        .bind(record_id)
        .bind(shop_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_claims(&self, issued_by: Option<i64>) -> Result<Vec<ClaimToken>, StoreError> {
        let sql = format!(
            "SELECT {} FROM claim_tokens
             WHERE ($1::BIGINT IS NULL OR issued_by_admin_id = $1)
             ORDER BY created_at DESC, id DESC",
            CLAIM_COLUMNS
        );
        sqlx::query_as::<_, ClaimToken>(&sql)
            .bind(issued_by)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }
}

// -- Shop Operations --

#[async_trait]
impl ShopStore for PgStore {
    async fn create_shop(&self, shop: &NewShop, at: DateTime<Utc>) -> Result<Shop, StoreError> {
        let sql = format!(
            "INSERT INTO shops (name, latitude, longitude, contact, hours, owner_user_id, created_at, modified_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             RETURNING {}",
            SHOP_COLUMNS
        );
        sqlx::query_as::<_, Shop>(&sql)
            .bind(&shop.name)
            .bind(shop.coordinates.latitude)
            .bind(shop.coordinates.longitude)
            .bind(&shop.contact)
            .bind(&shop.hours)
            .bind(shop.owner_user_id)
            .bind(at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn get_shop(&self, id: i64) -> Result<Option<Shop>, StoreError> {
        let sql = format!("SELECT {} FROM shops WHERE id = $1", SHOP_COLUMNS);
        sqlx::query_as::<_, Shop>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn list_shops_by_owner(&self, owner_user_id: i64) -> Result<Vec<Shop>, StoreError> {
        let sql = format!(
            "SELECT {} FROM shops WHERE owner_user_id = $1 ORDER BY id ASC",
            SHOP_COLUMNS
        );
        sqlx::query_as::<_, Shop>(&sql)
            .bind(owner_user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn update_shop(
        &self,
        id: i64,
        update: &ShopUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<Shop>, StoreError> {
        // Empty strings clear the optional fields.
        let sql = format!(
            "UPDATE shops
             SET name = COALESCE($2, name),
                 contact = CASE WHEN $3::TEXT IS NULL THEN contact ELSE NULLIF($3, '') END,
                 hours = CASE WHEN $4::TEXT IS NULL THEN hours ELSE NULLIF($4, '') END,
                 modified_at = $5
             WHERE id = $1
             RETURNING {}",
            SHOP_COLUMNS
        );
        sqlx::query_as::<_, Shop>(&sql)
            .bind(id)
            .bind(&update.name)
            .bind(&update.contact)
            .bind(&update.hours)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn delete_shop(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM shops WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_orphaned_shops(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM shops s
             WHERE s.created_at < $1
               AND NOT EXISTS (SELECT 1 FROM claim_tokens c WHERE c.bound_shop_id = s.id)",
        )
        .bind(created_before)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }
}

// -- Rate Operations --

/// Flat join row for the nearby candidate query.
#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    shop_id: i64,
    name: String,
    latitude: f64,
    longitude: f64,
    contact: Option<String>,
    hours: Option<String>,
    owner_user_id: i64,
    verified: bool,
    shop_created_at: DateTime<Utc>,
    shop_modified_at: DateTime<Utc>,
    rate_id: i64,
    from_currency: String,
    to_currency: String,
    buy_rate: Decimal,
    sell_rate: Decimal,
    updated_at: DateTime<Utc>,
    distance_m: f64,
}

impl From<CandidateRow> for Candidate {
    fn from(row: CandidateRow) -> Self {
        Candidate {
            shop: Shop {
                id: row.shop_id,
                name: row.name,
                latitude: row.latitude,
                longitude: row.longitude,
                contact: row.contact,
                hours: row.hours,
                owner_user_id: row.owner_user_id,
                verified: row.verified,
                created_at: row.shop_created_at,
                modified_at: row.shop_modified_at,
            },
            rate: Rate {
                id: row.rate_id,
                shop_id: row.shop_id,
                from_currency: row.from_currency,
                to_currency: row.to_currency,
                buy_rate: row.buy_rate,
                sell_rate: row.sell_rate,
                updated_at: row.updated_at,
            },
            distance_m: row.distance_m,
        }
    }
}

#[async_trait]
impl RateStore for PgStore {
    async fn upsert_rate(&self, quote: &RateQuote, at: DateTime<Utc>) -> Result<Rate, StoreError> {
        let sql = format!(
            "INSERT INTO rates (shop_id, from_currency, to_currency, buy_rate, sell_rate, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (shop_id, from_currency, to_currency) DO UPDATE
               SET buy_rate = EXCLUDED.buy_rate,
                   sell_rate = EXCLUDED.sell_rate,
                   updated_at = EXCLUDED.updated_at
             RETURNING {}",
            RATE_COLUMNS
        );
        sqlx::query_as::<_, Rate>(&sql)
            .bind(quote.shop_id)
            .bind(&quote.pair.from)
            .bind(&quote.pair.to)
            .bind(quote.buy_rate)
            .bind(quote.sell_rate)
            .bind(at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn list_rates(&self, shop_id: i64) -> Result<Vec<Rate>, StoreError> {
        let sql = format!(
            "SELECT {} FROM rates WHERE shop_id = $1 ORDER BY updated_at DESC",
            RATE_COLUMNS
        );
        sqlx::query_as::<_, Rate>(&sql)
            .bind(shop_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn ranked_nearby_search(
        &self,
        query: &NearbyQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedShop>, StoreError> {
        // ST_DWithin on geography measures on the spheroid and uses the GiST index.
        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT
                s.id AS shop_id, s.name, s.latitude, s.longitude, s.contact, s.hours,
                s.owner_user_id, s.verified,
                s.created_at AS shop_created_at, s.modified_at AS shop_modified_at,
                r.id AS rate_id, r.from_currency, r.to_currency,
                r.buy_rate, r.sell_rate, r.updated_at,
                ST_Distance(s.location, q.origin)::float8 AS distance_m
            FROM shops s
            JOIN rates r ON r.shop_id = s.id
            CROSS JOIN (SELECT ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography AS origin) q
            WHERE ST_DWithin(s.location, q.origin, $3)
              AND r.from_currency = $4
              AND r.to_currency = $5
              AND r.updated_at >= $6
            "#,
        )
        .bind(query.origin.latitude)
        .bind(query.origin.longitude)
        .bind(query.radius_meters())
        .bind(&query.pair.from)
        .bind(&query.pair.to)
        .bind(query.fresh_since(now))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        let candidates = rows.into_iter().map(Candidate::from).collect();
        Ok(ranking::rank(candidates, query, now))
    }
}
