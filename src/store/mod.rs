//! Persistence contracts for claim tokens, shops and rates.
//!
//! Two backends implement every trait: [`postgres::PgStore`] (PostgreSQL with
//! PostGIS) and [`memory::MemoryStore`] (in-process, for tests and local dev).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ClaimToken, NewClaimToken, NewShop, Rate, RateQuote, Shop, ShopUpdate};
use crate::ranking::{NearbyQuery, RankedShop};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Unique or foreign-key constraint violation.
    #[error("constraint violation: {0}")]
    Conflict(String),

    #[error("data corruption: {0}")]
    DataCorruption(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn insert_claim(&self, claim: &NewClaimToken) -> Result<ClaimToken, StoreError>;

    async fn find_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<ClaimToken>, StoreError>;

    /// Atomically flip an unused record to used and bind it to `shop_id`.
    ///
    /// The "still unused" predicate and the write happen as one operation at
    /// the store. Returns `false` when the record was already used (or does
    /// not exist); under concurrent callers exactly one sees `true`.
    async fn mark_used(
        &self,
        record_id: i64,
        shop_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Newest first, optionally restricted to one issuing admin.
    async fn list_claims(&self, issued_by: Option<i64>) -> Result<Vec<ClaimToken>, StoreError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
pub trait ShopStore: Send + Sync {
    async fn create_shop(&self, shop: &NewShop, at: DateTime<Utc>) -> Result<Shop, StoreError>;

    async fn get_shop(&self, id: i64) -> Result<Option<Shop>, StoreError>;

    async fn list_shops_by_owner(&self, owner_user_id: i64) -> Result<Vec<Shop>, StoreError>;

    /// Returns `None` when the shop does not exist.
    async fn update_shop(
        &self,
        id: i64,
        update: &ShopUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<Shop>, StoreError>;

    /// Removes the shop and its quotes. A shop bound by a claim token is a
    /// `Conflict`.
    async fn delete_shop(&self, id: i64) -> Result<bool, StoreError>;

    /// Delete shops created before `created_before` that no claim token binds.
    async fn delete_orphaned_shops(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RateStore: Send + Sync {
    /// Insert or overwrite the quote for (shop, from, to); `updated_at` becomes `at`.
    async fn upsert_rate(&self, quote: &RateQuote, at: DateTime<Utc>) -> Result<Rate, StoreError>;

    /// Newest first.
    async fn list_rates(&self, shop_id: i64) -> Result<Vec<Rate>, StoreError>;

    /// Geodetic range query plus the shared ranking pipeline.
    async fn ranked_nearby_search(
        &self,
        query: &NearbyQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedShop>, StoreError>;
}
