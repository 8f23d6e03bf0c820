//! Shop registration through a location claim token.
//!
//! Order: redeem, create the shop at the token's coordinates, then bind the
//! token to the shop with the store's conditional update. If the bind loses
//! a race the new shop is deleted and the caller gets `AlreadyUsedToken`. If
//! the bind keeps failing the shop is deleted and the token stays claimable.
//! Before either outcome the binding is read back, so a write that committed
//! despite reporting an error still counts as success.
//! A crash between create and bind leaves an unbound shop, which the orphan
//! sweep in `jobs::orphans` removes after a grace period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::claims::TokenRedeemer;
use crate::errors::AppError;
use crate::geo::Coordinates;
use crate::models::shop::{normalize_optional, validate_shop_name};
use crate::models::{NewShop, Shop};
use crate::store::{ShopStore, StoreError};

pub const MARK_USED_ATTEMPTS: u32 = 3;
const MARK_USED_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    pub token: String,
    #[serde(alias = "shopName")]
    pub shop_name: String,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub hours: Option<String>,
}

#[derive(Clone)]
pub struct RegistrationOrchestrator {
    redeemer: TokenRedeemer,
    shops: Arc<dyn ShopStore>,
}

impl RegistrationOrchestrator {
    pub fn new(redeemer: TokenRedeemer, shops: Arc<dyn ShopStore>) -> Self {
        Self { redeemer, shops }
    }

    pub async fn register_shop(
        &self,
        owner_id: i64,
        request: RegistrationRequest,
    ) -> Result<Shop, AppError> {
        self.register_shop_at(owner_id, request, Utc::now()).await
    }

    #[tracing::instrument(skip(self, request, now))]
    pub async fn register_shop_at(
        &self,
        owner_id: i64,
        request: RegistrationRequest,
        now: DateTime<Utc>,
    ) -> Result<Shop, AppError> {
        let name = validate_shop_name(&request.shop_name)?;

        let redemption = self.redeemer.redeem_at(&request.token, now).await?;

        let shop = self
            .shops
            .create_shop(
                &NewShop {
                    name,
                    coordinates: Coordinates {
                        latitude: redemption.latitude,
                        longitude: redemption.longitude,
                    },
                    contact: normalize_optional(request.contact),
                    hours: normalize_optional(request.hours),
                    owner_user_id: owner_id,
                },
                now,
            )
            .await?;

        let outcome = self.bind_with_retry(redemption.record_id, shop.id, now).await;

        // A bind that committed but reported an error shows up as `false` or
        // an error on the retry; the record then already points at this shop.
        let bound = match outcome {
            Ok(true) => true,
            _ => self.is_bound_to(redemption.correlation_id, shop.id).await,
        };
        if bound {
            tracing::info!(
                shop_id = shop.id,
                record_id = redemption.record_id,
                "shop registered"
            );
            return Ok(shop);
        }

        match outcome {
            Ok(_) => {
                tracing::info!(
                    shop_id = shop.id,
                    record_id = redemption.record_id,
                    "lost redemption race, abandoning shop"
                );
                self.abandon(shop.id).await;
                Err(AppError::AlreadyUsedToken)
            }
            Err(e) => {
                tracing::error!(
                    shop_id = shop.id,
                    record_id = redemption.record_id,
                    "could not bind token after {} attempts: {}",
                    MARK_USED_ATTEMPTS,
                    e
                );
                self.abandon(shop.id).await;
                Err(AppError::Persistence(e))
            }
        }
    }

    async fn is_bound_to(&self, correlation_id: Uuid, shop_id: i64) -> bool {
        match self.redeemer.bound_shop(correlation_id).await {
            Ok(bound) => bound == Some(shop_id),
            Err(e) => {
                tracing::warn!(shop_id, "could not read back token binding: {}", e);
                false
            }
        }
    }

    async fn bind_with_retry(
        &self,
        record_id: i64,
        shop_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut attempt = 1;
        loop {
            match self.redeemer.mark_used_at(record_id, shop_id, at).await {
                Ok(flipped) => return Ok(flipped),
                Err(AppError::Persistence(e)) if attempt < MARK_USED_ATTEMPTS => {
                    tracing::warn!(attempt, "mark_used failed, retrying: {}", e);
                    tokio::time::sleep(MARK_USED_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(AppError::Persistence(e)) => return Err(e),
                Err(other) => {
                    return Err(StoreError::DataCorruption(format!(
                        "unexpected bind failure: {}",
                        other
                    )))
                }
            }
        }
    }

    /// Best effort; a leftover shop is picked up by the orphan sweep.
    async fn abandon(&self, shop_id: i64) {
        if let Err(e) = self.shops.delete_shop(shop_id).await {
            tracing::error!(shop_id, "failed to delete abandoned shop: {}", e);
        }
    }
}
