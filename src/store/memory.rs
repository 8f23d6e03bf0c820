//! In-process store backed by `DashMap`.
//!
//! `mark_used` performs its check-and-set while holding the record's shard
//! write lock, which gives the same single-winner guarantee as the
//! conditional `UPDATE` in Postgres. Only valid within one process.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ClaimStore, RateStore, ShopStore, StoreError};
use crate::geo;
use crate::models::{ClaimToken, NewClaimToken, NewShop, Rate, RateQuote, Shop, ShopUpdate};
use crate::ranking::{self, Candidate, NearbyQuery, RankedShop};

type RateKey = (i64, String, String);

#[derive(Default)]
pub struct MemoryStore {
    claims: DashMap<i64, ClaimToken>,
    claims_by_correlation: DashMap<Uuid, i64>,
    shops: DashMap<i64, Shop>,
    rates: DashMap<RateKey, Rate>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn shop_count(&self) -> usize {
        self.shops.len()
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    fn remove_rates_for(&self, shop_id: i64) {
        self.rates.retain(|(id, _, _), _| *id != shop_id);
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn insert_claim(&self, claim: &NewClaimToken) -> Result<ClaimToken, StoreError> {
        if self.claims.iter().any(|c| c.token_hash == claim.token_hash) {
            return Err(StoreError::Conflict("token hash already exists".into()));
        }

        let id = match self.claims_by_correlation.entry(claim.correlation_id) {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict("correlation id already exists".into()))
            }
            Entry::Vacant(slot) => {
                let id = self.next_id();
                slot.insert(id);
                id
            }
        };

        let record = ClaimToken {
            id,
            token_hash: claim.token_hash.clone(),
            correlation_id: claim.correlation_id,
            latitude: claim.latitude,
            longitude: claim.longitude,
            expires_at: claim.expires_at,
            used_at: None,
            bound_shop_id: None,
            issued_by_admin_id: claim.issued_by_admin_id,
            created_at: Utc::now(),
        };
        self.claims.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<ClaimToken>, StoreError> {
        let id = match self.claims_by_correlation.get(&correlation_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.claims.get(&id).map(|c| c.clone()))
    }

    async fn mark_used(
        &self,
        record_id: i64,
        shop_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.claims.get_mut(&record_id) {
            Some(mut record) if record.used_at.is_none() => {
                record.used_at = Some(at);
                record.bound_shop_id = Some(shop_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_claims(&self, issued_by: Option<i64>) -> Result<Vec<ClaimToken>, StoreError> {
        let mut claims: Vec<ClaimToken> = self
            .claims
            .iter()
            .filter(|c| issued_by.map_or(true, |admin| c.issued_by_admin_id == admin))
            .map(|c| c.clone())
            .collect();
        claims.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(claims)
    }
}

#[async_trait]
impl ShopStore for MemoryStore {
    async fn create_shop(&self, shop: &NewShop, at: DateTime<Utc>) -> Result<Shop, StoreError> {
        let id = self.next_id();
        let record = Shop {
            id,
            name: shop.name.clone(),
            latitude: shop.coordinates.latitude,
            longitude: shop.coordinates.longitude,
            contact: shop.contact.clone(),
            hours: shop.hours.clone(),
            owner_user_id: shop.owner_user_id,
            verified: false,
            created_at: at,
            modified_at: at,
        };
        self.shops.insert(id, record.clone());
        Ok(record)
    }

    async fn get_shop(&self, id: i64) -> Result<Option<Shop>, StoreError> {
        Ok(self.shops.get(&id).map(|s| s.clone()))
    }

    async fn list_shops_by_owner(&self, owner_user_id: i64) -> Result<Vec<Shop>, StoreError> {
        let mut shops: Vec<Shop> = self
            .shops
            .iter()
            .filter(|s| s.owner_user_id == owner_user_id)
            .map(|s| s.clone())
            .collect();
        shops.sort_by_key(|s| s.id);
        Ok(shops)
    }

    async fn update_shop(
        &self,
        id: i64,
        update: &ShopUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<Shop>, StoreError> {
        let Some(mut shop) = self.shops.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            shop.name = name.clone();
        }
        if let Some(contact) = &update.contact {
            shop.contact = Some(contact.clone()).filter(|c| !c.is_empty());
        }
        if let Some(hours) = &update.hours {
            shop.hours = Some(hours.clone()).filter(|h| !h.is_empty());
        }
        shop.modified_at = at;
        Ok(Some(shop.clone()))
    }

    async fn delete_shop(&self, id: i64) -> Result<bool, StoreError> {
        if self.claims.iter().any(|c| c.bound_shop_id == Some(id)) {
            return Err(StoreError::Conflict(format!(
                "shop {} is bound to a claim token",
                id
            )));
        }
        let removed = self.shops.remove(&id).is_some();
        if removed {
            self.remove_rates_for(id);
        }
        Ok(removed)
    }

    async fn delete_orphaned_shops(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let bound: HashSet<i64> = self.claims.iter().filter_map(|c| c.bound_shop_id).collect();
        let orphans: Vec<i64> = self
            .shops
            .iter()
            .filter(|s| !bound.contains(&s.id) && s.created_at < created_before)
            .map(|s| s.id)
            .collect();

        let mut removed = 0;
        for id in orphans {
            if self.shops.remove(&id).is_some() {
                self.remove_rates_for(id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn upsert_rate(&self, quote: &RateQuote, at: DateTime<Utc>) -> Result<Rate, StoreError> {
        if !self.shops.contains_key(&quote.shop_id) {
            return Err(StoreError::Conflict(format!("shop {} does not exist", quote.shop_id)));
        }

        let key = (quote.shop_id, quote.pair.from.clone(), quote.pair.to.clone());
        let rate = match self.rates.entry(key) {
            Entry::Occupied(mut existing) => {
                let rate = existing.get_mut();
                rate.buy_rate = quote.buy_rate;
                rate.sell_rate = quote.sell_rate;
                rate.updated_at = at;
                rate.clone()
            }
            Entry::Vacant(slot) => {
                let rate = Rate {
                    id: self.next_id(),
                    shop_id: quote.shop_id,
                    from_currency: quote.pair.from.clone(),
                    to_currency: quote.pair.to.clone(),
                    buy_rate: quote.buy_rate,
                    sell_rate: quote.sell_rate,
                    updated_at: at,
                };
                slot.insert(rate.clone());
                rate
            }
        };
        Ok(rate)
    }

    async fn list_rates(&self, shop_id: i64) -> Result<Vec<Rate>, StoreError> {
        let mut rates: Vec<Rate> = self
            .rates
            .iter()
            .filter(|r| r.shop_id == shop_id)
            .map(|r| r.clone())
            .collect();
        rates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rates)
    }

    async fn ranked_nearby_search(
        &self,
        query: &NearbyQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedShop>, StoreError> {
        let fresh_since = query.fresh_since(now);
        let candidates: Vec<Candidate> = self
            .rates
            .iter()
            .filter(|r| r.from_currency == query.pair.from && r.to_currency == query.pair.to)
            .filter(|r| r.updated_at >= fresh_since)
            .filter_map(|r| {
                let shop = self.shops.get(&r.shop_id)?.clone();
                let distance_m = geo::distance_meters(query.origin, shop.coordinates());
                Some(Candidate {
                    shop,
                    rate: r.clone(),
                    distance_m,
                })
            })
            .collect();

        Ok(ranking::rank(candidates, query, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinates;
    use crate::models::CurrencyPair;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn new_claim(hash: &str, cid: Uuid) -> NewClaimToken {
        NewClaimToken {
            token_hash: hash.into(),
            correlation_id: cid,
            latitude: 1.0,
            longitude: 2.0,
            expires_at: Utc::now() + Duration::days(1),
            issued_by_admin_id: 7,
        }
    }

    fn new_shop(owner: i64) -> NewShop {
        NewShop {
            name: "Cambio".into(),
            coordinates: Coordinates::new(1.0, 2.0).unwrap(),
            contact: None,
            hours: None,
            owner_user_id: owner,
        }
    }

    #[tokio::test]
    async fn test_mark_used_only_once() {
        let store = MemoryStore::new();
        let claim = store.insert_claim(&new_claim("h1", Uuid::new_v4())).await.unwrap();
        assert!(store.mark_used(claim.id, 10, Utc::now()).await.unwrap());
        assert!(!store.mark_used(claim.id, 11, Utc::now()).await.unwrap());

        let stored = store.find_by_correlation_id(claim.correlation_id).await.unwrap().unwrap();
        assert_eq!(stored.bound_shop_id, Some(10));
        assert!(stored.used_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_used_unknown_record() {
        let store = MemoryStore::new();
        assert!(!store.mark_used(999, 1, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_uniqueness() {
        let store = MemoryStore::new();
        let cid = Uuid::new_v4();
        store.insert_claim(&new_claim("h1", cid)).await.unwrap();
        assert!(matches!(
            store.insert_claim(&new_claim("h2", cid)).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.insert_claim(&new_claim("h1", Uuid::new_v4())).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.claim_count(), 1);
    }

    #[tokio::test]
    async fn test_list_claims_filters_by_admin() {
        let store = MemoryStore::new();
        store.insert_claim(&new_claim("h1", Uuid::new_v4())).await.unwrap();
        let mut other = new_claim("h2", Uuid::new_v4());
        other.issued_by_admin_id = 8;
        store.insert_claim(&other).await.unwrap();

        assert_eq!(store.list_claims(None).await.unwrap().len(), 2);
        let mine = store.list_claims(Some(8)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].issued_by_admin_id, 8);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_quote() {
        let store = MemoryStore::new();
        let shop = store.create_shop(&new_shop(1), Utc::now()).await.unwrap();
        let pair = CurrencyPair::new("USD", "PHP").unwrap();
        let earlier = Utc::now() - Duration::days(2);

        let first = RateQuote::new(shop.id, pair.clone(), Decimal::new(5600, 2), Decimal::new(5500, 2)).unwrap();
        let r1 = store.upsert_rate(&first, earlier).await.unwrap();
        let second = RateQuote::new(shop.id, pair, Decimal::new(5650, 2), Decimal::new(5550, 2)).unwrap();
        let now = Utc::now();
        let r2 = store.upsert_rate(&second, now).await.unwrap();

        assert_eq!(r1.id, r2.id);
        assert_eq!(r2.buy_rate, Decimal::new(5650, 2));
        assert_eq!(r2.updated_at, now);
        assert_eq!(store.list_rates(shop.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_requires_shop() {
        let store = MemoryStore::new();
        let pair = CurrencyPair::new("USD", "PHP").unwrap();
        let quote = RateQuote::new(42, pair, Decimal::ONE, Decimal::ONE).unwrap();
        assert!(store.upsert_rate(&quote, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_orphan_sweep_spares_bound_and_recent_shops() {
        let store = MemoryStore::new();
        let old = Utc::now() - Duration::hours(2);
        let bound = store.create_shop(&new_shop(1), old).await.unwrap();
        let orphan = store.create_shop(&new_shop(2), old).await.unwrap();
        let recent = store.create_shop(&new_shop(3), Utc::now()).await.unwrap();

        let claim = store.insert_claim(&new_claim("h1", Uuid::new_v4())).await.unwrap();
        store.mark_used(claim.id, bound.id, Utc::now()).await.unwrap();

        let removed = store
            .delete_orphaned_shops(Utc::now() - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_shop(orphan.id).await.unwrap().is_none());
        assert!(store.get_shop(bound.id).await.unwrap().is_some());
        assert!(store.get_shop(recent.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_shop_cascades_rates() {
        let store = MemoryStore::new();
        let shop = store.create_shop(&new_shop(1), Utc::now()).await.unwrap();
        let pair = CurrencyPair::new("USD", "PHP").unwrap();
        let quote = RateQuote::new(shop.id, pair, Decimal::ONE, Decimal::ONE).unwrap();
        store.upsert_rate(&quote, Utc::now()).await.unwrap();

        assert!(store.delete_shop(shop.id).await.unwrap());
        assert!(store.list_rates(shop.id).await.unwrap().is_empty());
        assert!(!store.delete_shop(shop.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_bound_shop_cannot_be_deleted() {
        let store = MemoryStore::new();
        let shop = store.create_shop(&new_shop(1), Utc::now()).await.unwrap();
        let claim = store.insert_claim(&new_claim("h1", Uuid::new_v4())).await.unwrap();
        store.mark_used(claim.id, shop.id, Utc::now()).await.unwrap();

        assert!(matches!(
            store.delete_shop(shop.id).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.get_shop(shop.id).await.unwrap().is_some());
    }
}
