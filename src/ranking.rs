//! Proximity-ranked rate search.
//!
//! The ranking predicates are plain functions so every store backend runs the
//! exact same filter/score/order/cap pipeline:
//!
//! 1. geodetic distance ≤ radius
//! 2. exact ordered currency pair
//! 3. quote updated within the last 7 days (older quotes are dropped, not penalized)
//! 4. `buy_score = buy_rate + age_days × 0.5`, ascending; ties by distance ascending
//! 5. at most 10 results
//!
//! A symmetric `sell_score` is computed and carried on every result but does
//! not participate in ordering.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::errors::AppError;
use crate::geo::Coordinates;
use crate::metrics;
use crate::models::{CurrencyPair, Rate, Shop};
use crate::store::RateStore;

pub const MAX_RADIUS_KM: f64 = 20.0;
pub const DEFAULT_RADIUS_KM: f64 = 5.0;
pub const FRESHNESS_WINDOW_DAYS: i64 = 7;
pub const STALENESS_PENALTY_PER_DAY: f64 = 0.5;
pub const MAX_RESULTS: usize = 10;

const SECONDS_PER_DAY: f64 = 86_400.0;

// ── Query ─────────────────────────────────────────────────────

/// A validated nearby-search request.
#[derive(Debug, Clone)]
pub struct NearbyQuery {
    pub origin: Coordinates,
    pub radius_km: f64,
    pub pair: CurrencyPair,
}

impl NearbyQuery {
    pub fn new(
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<Self, AppError> {
        let origin = Coordinates::new(latitude, longitude)?;
        if !radius_km.is_finite() || radius_km <= 0.0 || radius_km > MAX_RADIUS_KM {
            return Err(AppError::validation(format!(
                "radius must be within (0, {}] km, got {}",
                MAX_RADIUS_KM, radius_km
            )));
        }
        let pair = CurrencyPair::new(from_currency, to_currency)?;
        Ok(Self {
            origin,
            radius_km,
            pair,
        })
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_km * 1000.0
    }

    /// Oldest `updated_at` that still counts as fresh.
    pub fn fresh_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(FRESHNESS_WINDOW_DAYS)
    }
}

// ── Pipeline ──────────────────────────────────────────────────

/// A shop/quote pair returned by a store's range query, before ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub shop: Shop,
    pub rate: Rate,
    pub distance_m: f64,
}

#[derive(Debug, Clone)]
pub struct RankedShop {
    pub shop: Shop,
    pub rate: Rate,
    pub distance_m: f64,
    pub age_days: f64,
    pub buy_score: f64,
    // Not used for ordering yet.
    pub sell_score: f64,
}

/// Fractional days elapsed since the quote was last updated.
pub fn age_days(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - updated_at).num_milliseconds() as f64 / 1000.0;
    (secs / SECONDS_PER_DAY).max(0.0)
}

pub fn is_fresh(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - updated_at <= Duration::days(FRESHNESS_WINDOW_DAYS)
}

pub fn within_radius(distance_m: f64, radius_km: f64) -> bool {
    distance_m <= radius_km * 1000.0
}

/// Lower is better: cheaper quote, penalized half a point per day of age.
pub fn score(rate: f64, age_days: f64) -> f64 {
    rate + age_days * STALENESS_PENALTY_PER_DAY
}

fn compare_ranked(a: &RankedShop, b: &RankedShop) -> Ordering {
    a.buy_score
        .total_cmp(&b.buy_score)
        .then_with(|| a.distance_m.total_cmp(&b.distance_m))
        .then_with(|| a.shop.id.cmp(&b.shop.id))
}

/// Filter, score, order and cap a candidate set.
pub fn rank(candidates: Vec<Candidate>, query: &NearbyQuery, now: DateTime<Utc>) -> Vec<RankedShop> {
    let mut ranked: Vec<RankedShop> = candidates
        .into_iter()
        .filter(|c| within_radius(c.distance_m, query.radius_km))
        .filter(|c| c.rate.from_currency == query.pair.from && c.rate.to_currency == query.pair.to)
        .filter(|c| is_fresh(c.rate.updated_at, now))
        .map(|c| {
            let age = age_days(c.rate.updated_at, now);
            let buy = c.rate.buy_rate.to_f64().unwrap_or(f64::MAX);
            let sell = c.rate.sell_rate.to_f64().unwrap_or(f64::MAX);
            RankedShop {
                buy_score: score(buy, age),
                sell_score: score(sell, age),
                age_days: age,
                distance_m: c.distance_m,
                shop: c.shop,
                rate: c.rate,
            }
        })
        .collect();

    ranked.sort_by(compare_ranked);
    ranked.truncate(MAX_RESULTS);
    ranked
}

// ── Output ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct NearbyResult {
    pub id: i64,
    pub name: String,
    pub contact: Option<String>,
    pub hours: Option<String>,
    pub coordinates: Coordinates,
    /// Meters, rounded to the nearest integer.
    pub distance: i64,
    pub rates: QuoteSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteSummary {
    pub from_currency: String,
    pub to_currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub buy_rate: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub sell_rate: rust_decimal::Decimal,
    /// Days, rounded to one decimal.
    pub rate_age: f64,
}

impl From<RankedShop> for NearbyResult {
    fn from(r: RankedShop) -> Self {
        Self {
            coordinates: r.shop.coordinates(),
            id: r.shop.id,
            name: r.shop.name,
            contact: r.shop.contact,
            hours: r.shop.hours,
            distance: r.distance_m.round() as i64,
            rates: QuoteSummary {
                from_currency: r.rate.from_currency,
                to_currency: r.rate.to_currency,
                buy_rate: r.rate.buy_rate,
                sell_rate: r.rate.sell_rate,
                rate_age: (r.age_days * 10.0).round() / 10.0,
            },
        }
    }
}

// ── Ranker ────────────────────────────────────────────────────

/// Public, unauthenticated nearby-rate search.
#[derive(Clone)]
pub struct ProximityRanker {
    rates: Arc<dyn RateStore>,
}

impl ProximityRanker {
    pub fn new(rates: Arc<dyn RateStore>) -> Self {
        Self { rates }
    }

    pub async fn search(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<Vec<NearbyResult>, AppError> {
        let query = NearbyQuery::new(latitude, longitude, radius_km, from_currency, to_currency)?;
        self.search_at(&query, Utc::now()).await
    }

    #[tracing::instrument(skip(self, query), fields(from = %query.pair.from, to = %query.pair.to))]
    pub async fn search_at(
        &self,
        query: &NearbyQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<NearbyResult>, AppError> {
        let ranked = self
            .rates
            .ranked_nearby_search(query, now)
            .await
            .map_err(AppError::SearchQuery)?;

        metrics::record_search(ranked.len());
        tracing::debug!(results = ranked.len(), radius_km = query.radius_km, "nearby search");

        Ok(ranked.into_iter().map(NearbyResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn shop(id: i64) -> Shop {
        let now = Utc::now();
        Shop {
            id,
            name: format!("shop-{}", id),
            latitude: 14.55,
            longitude: 121.02,
            contact: None,
            hours: None,
            owner_user_id: 1,
            verified: false,
            created_at: now,
            modified_at: now,
        }
    }

    fn candidate(id: i64, buy: Decimal, age_days: i64, distance_m: f64, now: DateTime<Utc>) -> Candidate {
        Candidate {
            shop: shop(id),
            rate: Rate {
                id,
                shop_id: id,
                from_currency: "USD".into(),
                to_currency: "EUR".into(),
                buy_rate: buy,
                sell_rate: buy,
                updated_at: now - Duration::days(age_days),
            },
            distance_m,
        }
    }

    fn query(radius_km: f64) -> NearbyQuery {
        NearbyQuery::new(14.55, 121.02, radius_km, "usd", "eur").unwrap()
    }

    #[test]
    fn test_score_formula() {
        assert_eq!(score(1.00, 0.0), 1.00);
        assert!((score(0.98, 6.0) - 3.98).abs() < 1e-12);
    }

    #[test]
    fn test_fresher_quote_beats_cheaper_stale_quote() {
        let now = Utc::now();
        let a = candidate(1, Decimal::new(100, 2), 0, 900.0, now);
        let b = candidate(2, Decimal::new(98, 2), 6, 100.0, now);
        let ranked = rank(vec![b, a], &query(5.0), now);
        assert_eq!(ranked.iter().map(|r| r.shop.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!((ranked[1].buy_score - 3.98).abs() < 1e-9);
    }

    #[test]
    fn test_quotes_older_than_window_are_excluded() {
        let now = Utc::now();
        let stale_winner = candidate(1, Decimal::new(1, 2), 8, 10.0, now);
        let ordinary = candidate(2, Decimal::new(150, 2), 1, 10.0, now);
        let ranked = rank(vec![stale_winner, ordinary], &query(5.0), now);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].shop.id, 2);
    }

    #[test]
    fn test_freshness_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(is_fresh(now - Duration::days(7), now));
        assert!(!is_fresh(now - Duration::days(7) - Duration::seconds(1), now));
    }

    #[test]
    fn test_ties_broken_by_distance() {
        let now = Utc::now();
        let far = candidate(1, Decimal::ONE, 0, 2_000.0, now);
        let near = candidate(2, Decimal::ONE, 0, 500.0, now);
        let ranked = rank(vec![far, near], &query(5.0), now);
        assert_eq!(ranked[0].shop.id, 2);
        assert_eq!(ranked[1].shop.id, 1);
    }

    #[test]
    fn test_results_capped_at_ten() {
        let now = Utc::now();
        let candidates = (1..=15)
            .map(|i| candidate(i, Decimal::new(100 + i, 2), 0, 100.0, now))
            .collect();
        let ranked = rank(candidates, &query(5.0), now);
        assert_eq!(ranked.len(), MAX_RESULTS);
        assert_eq!(ranked.last().unwrap().shop.id, 10);
    }

    #[test]
    fn test_outside_radius_and_other_pairs_filtered() {
        let now = Utc::now();
        let outside = candidate(1, Decimal::ONE, 0, 5_000.5, now);
        let mut reversed = candidate(2, Decimal::ONE, 0, 10.0, now);
        reversed.rate.from_currency = "EUR".into();
        reversed.rate.to_currency = "USD".into();
        let inside = candidate(3, Decimal::ONE, 0, 4_999.5, now);
        let ranked = rank(vec![outside, reversed, inside], &query(5.0), now);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].shop.id, 3);
    }

    #[test]
    fn test_sell_score_does_not_affect_order() {
        let now = Utc::now();
        let mut a = candidate(1, Decimal::new(100, 2), 0, 100.0, now);
        a.rate.sell_rate = Decimal::new(9_000, 2);
        let mut b = candidate(2, Decimal::new(101, 2), 0, 100.0, now);
        b.rate.sell_rate = Decimal::new(1, 2);
        let ranked = rank(vec![b, a], &query(5.0), now);
        assert_eq!(ranked[0].shop.id, 1);
        assert!(ranked[0].sell_score > ranked[1].sell_score);
    }

    #[test]
    fn test_result_rounding() {
        let now = Utc::now();
        let mut c = candidate(1, Decimal::ONE, 0, 1234.5678, now);
        c.rate.updated_at = now - Duration::hours(30);
        let ranked = rank(vec![c], &query(5.0), now);
        let result = NearbyResult::from(ranked.into_iter().next().unwrap());
        assert_eq!(result.distance, 1235);
        assert_eq!(result.rates.rate_age, 1.3);
    }

    #[test]
    fn test_query_validation() {
        assert!(NearbyQuery::new(0.0, 0.0, 20.0, "USD", "EUR").is_ok());
        assert!(NearbyQuery::new(0.0, 0.0, 0.0, "USD", "EUR").is_err());
        assert!(NearbyQuery::new(0.0, 0.0, 20.01, "USD", "EUR").is_err());
        assert!(NearbyQuery::new(0.0, 0.0, f64::NAN, "USD", "EUR").is_err());
        assert!(NearbyQuery::new(95.0, 0.0, 1.0, "USD", "EUR").is_err());
        assert!(NearbyQuery::new(0.0, 0.0, 1.0, "USDT", "EUR").is_err());
        assert_eq!(query(1.0).pair.from, "USD");
    }
}
