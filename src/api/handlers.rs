use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identity::{AdminId, OwnerId};
use crate::errors::AppError;
use crate::models::{ClaimToken, CurrencyPair, Rate, RateQuote, Shop, ShopUpdate};
use crate::ranking::{NearbyResult, DEFAULT_RADIUS_KM};
use crate::registration::RegistrationRequest;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct IssueTokenRequest {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng")]
    pub longitude: f64,
    #[serde(default, alias = "expiresInDays")]
    pub expires_in_days: Option<i64>,
}

#[derive(Serialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Deserialize)]
pub struct ListTokensParams {
    pub admin_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct NearbyParams {
    pub lat: f64,
    pub lng: f64,
    pub radius: Option<f64>,
    #[serde(alias = "fromCurrency")]
    pub from_currency: String,
    #[serde(alias = "toCurrency")]
    pub to_currency: String,
}

#[derive(Deserialize)]
pub struct UpsertRateRequest {
    #[serde(alias = "fromCurrency")]
    pub from_currency: String,
    #[serde(alias = "toCurrency")]
    pub to_currency: String,
    #[serde(with = "rust_decimal::serde::float", alias = "buyRate")]
    pub buy_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float", alias = "sellRate")]
    pub sell_rate: Decimal,
}

// ── Admin: location tokens ───────────────────────────────────

/// POST /api/v1/admin/location-tokens — issue a claim token for a coordinate
pub async fn issue_location_token(
    State(state): State<Arc<AppState>>,
    AdminId(admin_id): AdminId,
    Json(payload): Json<IssueTokenRequest>,
) -> Result<(StatusCode, Json<IssueTokenResponse>), AppError> {
    let issued = state
        .issuer
        .issue(
            payload.latitude,
            payload.longitude,
            admin_id,
            payload.expires_in_days,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueTokenResponse {
            token: issued.token,
            expires_at: issued.expires_at,
            message: "Store this token securely; it will not be shown again.".into(),
        }),
    ))
}

/// GET /api/v1/admin/location-tokens — list issued tokens, newest first
pub async fn list_location_tokens(
    State(state): State<Arc<AppState>>,
    _admin: AdminId,
    Query(params): Query<ListTokensParams>,
) -> Result<Json<Vec<ClaimToken>>, AppError> {
    let tokens = state.claims.list_claims(params.admin_id).await?;
    Ok(Json(tokens))
}

// ── Shops ────────────────────────────────────────────────────

/// POST /api/v1/shops/register — redeem a claim token into a new shop
pub async fn register_shop(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Json(payload): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<Shop>), AppError> {
    let shop = state.registration.register_shop(owner_id, payload).await?;
    Ok((StatusCode::CREATED, Json(shop)))
}

/// GET /api/v1/shops/mine
pub async fn my_shops(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
) -> Result<Json<Vec<Shop>>, AppError> {
    Ok(Json(state.shops.list_shops_by_owner(owner_id).await?))
}

/// GET /api/v1/shops/nearby — public ranked rate search
pub async fn nearby_shops(
    State(state): State<Arc<AppState>>,
    params: Result<Query<NearbyParams>, QueryRejection>,
) -> Result<Json<Vec<NearbyResult>>, AppError> {
    let Query(params) = params.map_err(|e| AppError::validation(e.body_text()))?;
    let results = state
        .ranker
        .search(
            params.lat,
            params.lng,
            params.radius.unwrap_or(DEFAULT_RADIUS_KM),
            &params.from_currency,
            &params.to_currency,
        )
        .await?;
    Ok(Json(results))
}

/// GET /api/v1/shops/:id
pub async fn get_shop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Shop>, AppError> {
    load_shop(&state, id).await.map(Json)
}

/// PUT /api/v1/shops/:id — owner-only metadata update
pub async fn update_shop(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<i64>,
    Json(payload): Json<ShopUpdate>,
) -> Result<Json<Shop>, AppError> {
    let update = payload.validated()?;
    ensure_owner(&load_shop(&state, id).await?, owner_id)?;

    let shop = state
        .shops
        .update_shop(id, &update, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound("shop".into()))?;
    tracing::info!(shop_id = id, "shop updated");
    Ok(Json(shop))
}

// ── Rates ────────────────────────────────────────────────────

/// GET /api/v1/shops/:id/rates — newest first
pub async fn list_rates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Rate>>, AppError> {
    load_shop(&state, id).await?;
    Ok(Json(state.rates.list_rates(id).await?))
}

/// POST /api/v1/shops/:id/rates — owner-only quote upsert
pub async fn upsert_rate(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<i64>,
    Json(payload): Json<UpsertRateRequest>,
) -> Result<Json<Rate>, AppError> {
    let pair = CurrencyPair::new(&payload.from_currency, &payload.to_currency)?;
    let quote = RateQuote::new(id, pair, payload.buy_rate, payload.sell_rate)?;
    ensure_owner(&load_shop(&state, id).await?, owner_id)?;

    let rate = state.rates.upsert_rate(&quote, Utc::now()).await?;
    Ok(Json(rate))
}

// ── Helpers ──────────────────────────────────────────────────

async fn load_shop(state: &AppState, id: i64) -> Result<Shop, AppError> {
    state
        .shops
        .get_shop(id)
        .await?
        .ok_or_else(|| AppError::NotFound("shop".into()))
}

fn ensure_owner(shop: &Shop, owner_id: i64) -> Result<(), AppError> {
    if shop.owner_user_id != owner_id {
        tracing::warn!(shop_id = shop.id, caller = owner_id, "non-owner attempted shop write");
        return Err(AppError::Forbidden("only the shop owner may modify it".into()));
    }
    Ok(())
}
