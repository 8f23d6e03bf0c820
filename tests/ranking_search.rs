//! Nearby rate search over the in-memory store: geodetic radius boundary,
//! freshness window, score ordering and currency-pair matching.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use forexfinder::errors::AppError;
use forexfinder::geo::{Coordinates, WGS84_A};
use forexfinder::models::{CurrencyPair, NewShop, RateQuote, Shop};
use forexfinder::ranking::{NearbyQuery, ProximityRanker};
use forexfinder::store::memory::MemoryStore;
use forexfinder::store::{RateStore, ShopStore};

async fn shop_at(store: &MemoryStore, name: &str, lat: f64, lng: f64) -> Shop {
    store
        .create_shop(
            &NewShop {
                name: name.into(),
                coordinates: Coordinates::new(lat, lng).unwrap(),
                contact: None,
                hours: None,
                owner_user_id: 1,
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

async fn quote(
    store: &MemoryStore,
    shop: &Shop,
    from: &str,
    to: &str,
    buy: Decimal,
    sell: Decimal,
    updated_at: DateTime<Utc>,
) {
    let pair = CurrencyPair::new(from, to).unwrap();
    let quote = RateQuote::new(shop.id, pair, buy, sell).unwrap();
    store.upsert_rate(&quote, updated_at).await.unwrap();
}

/// Degrees of longitude spanning `meters` along the equator.
fn equator_degrees(meters: f64) -> f64 {
    (meters / WGS84_A).to_degrees()
}

mod boundary_tests {
    use super::*;

    #[tokio::test]
    async fn test_radius_boundary_is_geodetic() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let rate = Decimal::new(5600, 2);

        let inside = shop_at(&store, "inside", 0.0, equator_degrees(4_999.0)).await;
        let outside = shop_at(&store, "outside", 0.0, equator_degrees(5_001.0)).await;
        // Inside the 5 km bounding box on both axes, but ~5.14 km away.
        let offset = equator_degrees(5_000.0 / 2f64.sqrt() + 100.0);
        let corner = shop_at(&store, "corner", offset, offset).await;
        for shop in [&inside, &outside, &corner] {
            quote(&store, shop, "USD", "PHP", rate, rate, now).await;
        }

        let ranker = ProximityRanker::new(store.clone());
        let query = NearbyQuery::new(0.0, 0.0, 5.0, "USD", "PHP").unwrap();
        let results = ranker.search_at(&query, now).await.unwrap();

        let ids: Vec<i64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![inside.id]);
        assert_eq!(results[0].distance, 4_999);
    }

    #[tokio::test]
    async fn test_maximum_radius_accepted_and_exceeded_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ranker = ProximityRanker::new(store);
        assert!(ranker.search(0.0, 0.0, 20.0, "USD", "PHP").await.is_ok());
        assert!(matches!(
            ranker.search(0.0, 0.0, 20.5, "USD", "PHP").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ranker.search(0.0, 0.0, 0.0, "USD", "PHP").await,
            Err(AppError::Validation(_))
        ));
    }
}

mod ordering_tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_quote_outranks_cheaper_stale_quote() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let a = shop_at(&store, "A", 14.5547, 121.0244).await;
        let b = shop_at(&store, "B", 14.5550, 121.0250).await;
        quote(&store, &a, "USD", "EUR", Decimal::new(100, 2), Decimal::new(95, 2), now).await;
        quote(
            &store,
            &b,
            "USD",
            "EUR",
            Decimal::new(98, 2),
            Decimal::new(93, 2),
            now - Duration::days(6),
        )
        .await;

        let ranker = ProximityRanker::new(store.clone());
        let query = NearbyQuery::new(14.5547, 121.0244, 5.0, "USD", "EUR").unwrap();
        let results = ranker.search_at(&query, now).await.unwrap();

        assert_eq!(results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(results[0].rates.rate_age, 0.0);
        assert_eq!(results[1].rates.rate_age, 6.0);
    }

    #[tokio::test]
    async fn test_eight_day_old_quote_excluded_regardless_of_price() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let stale = shop_at(&store, "stale", 1.0, 1.0).await;
        let fresh = shop_at(&store, "fresh", 1.001, 1.001).await;
        quote(
            &store,
            &stale,
            "USD",
            "EUR",
            Decimal::new(1, 2),
            Decimal::new(1, 2),
            now - Duration::days(8),
        )
        .await;
        quote(&store, &fresh, "USD", "EUR", Decimal::new(500, 2), Decimal::new(500, 2), now).await;

        let ranker = ProximityRanker::new(store.clone());
        let query = NearbyQuery::new(1.0, 1.0, 5.0, "USD", "EUR").unwrap();
        let results = ranker.search_at(&query, now).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, fresh.id);
    }

    #[tokio::test]
    async fn test_pair_is_ordered_and_case_insensitive() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let forward = shop_at(&store, "forward", 1.0, 1.0).await;
        let reverse = shop_at(&store, "reverse", 1.0, 1.0).await;
        quote(&store, &forward, "usd", "jpy", Decimal::new(150, 0), Decimal::new(148, 0), now).await;
        quote(&store, &reverse, "JPY", "USD", Decimal::new(1, 2), Decimal::new(1, 2), now).await;

        let ranker = ProximityRanker::new(store.clone());
        let results = ranker.search(1.0, 1.0, 1.0, " Usd", "jPy ").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, forward.id);
        assert_eq!(results[0].rates.from_currency, "USD");
        assert_eq!(results[0].rates.to_currency, "JPY");
    }

    #[tokio::test]
    async fn test_results_capped_at_ten_cheapest() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut shops = Vec::new();
        for i in 0..12 {
            let shop = shop_at(&store, &format!("shop-{}", i), 2.0, 2.0 + i as f64 * 0.0001).await;
            quote(&store, &shop, "EUR", "GBP", Decimal::new(85 + i, 2), Decimal::new(80, 2), now).await;
            shops.push(shop);
        }

        let ranker = ProximityRanker::new(store.clone());
        let results = ranker.search(2.0, 2.0, 5.0, "EUR", "GBP").await.unwrap();

        assert_eq!(results.len(), 10);
        let expected: Vec<i64> = shops.iter().take(10).map(|s| s.id).collect();
        assert_eq!(results.iter().map(|r| r.id).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_quote_age() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let shop = shop_at(&store, "refreshing", 3.0, 3.0).await;
        quote(
            &store,
            &shop,
            "USD",
            "THB",
            Decimal::new(3600, 2),
            Decimal::new(3500, 2),
            now - Duration::days(9),
        )
        .await;

        let ranker = ProximityRanker::new(store.clone());
        let query = NearbyQuery::new(3.0, 3.0, 1.0, "USD", "THB").unwrap();
        assert!(ranker.search_at(&query, now).await.unwrap().is_empty());

        quote(&store, &shop, "USD", "THB", Decimal::new(3610, 2), Decimal::new(3510, 2), now).await;
        let results = ranker.search_at(&query, now).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rates.buy_rate, Decimal::new(3610, 2));
    }
}
