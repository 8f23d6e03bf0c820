use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::hash::verify_token_hash;
use super::signer::ClaimSigner;
use super::RejectReason;
use crate::errors::AppError;
use crate::metrics;
use crate::store::ClaimStore;

/// A verified, still-unused claim. Coordinates come from the signed payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Redemption {
    pub latitude: f64,
    pub longitude: f64,
    pub record_id: i64,
    pub correlation_id: Uuid,
}

#[derive(Clone)]
pub struct TokenRedeemer {
    claims: Arc<dyn ClaimStore>,
    signer: Arc<ClaimSigner>,
}

impl TokenRedeemer {
    pub fn new(claims: Arc<dyn ClaimStore>, signer: Arc<ClaimSigner>) -> Self {
        Self { claims, signer }
    }

    pub async fn redeem(&self, token: &str) -> Result<Redemption, AppError> {
        self.redeem_at(token, Utc::now()).await
    }

    /// Verify `token` without consuming it. `mark_used` performs the flip.
    pub async fn redeem_at(&self, token: &str, now: DateTime<Utc>) -> Result<Redemption, AppError> {
        let claims = match self.signer.verify(token, now) {
            Ok(claims) => claims,
            Err(reason) => return Err(reject(reason, None)),
        };

        let record = match self.claims.find_by_correlation_id(claims.cid).await? {
            Some(record) => record,
            None => return Err(reject(RejectReason::UnknownRecord, None)),
        };

        if !verify_token_hash(token, &record.token_hash) {
            return Err(reject(RejectReason::HashMismatch, Some(record.id)));
        }

        if record.is_used() {
            metrics::record_redemption("already_used");
            tracing::info!(record_id = record.id, "location token already used");
            return Err(AppError::AlreadyUsedToken);
        }

        if record.is_expired_at(now) {
            return Err(reject(RejectReason::RecordExpired, Some(record.id)));
        }

        Ok(Redemption {
            latitude: claims.lat,
            longitude: claims.lng,
            record_id: record.id,
            correlation_id: record.correlation_id,
        })
    }

    /// Shop the record is currently bound to, read back from the store.
    pub async fn bound_shop(&self, correlation_id: Uuid) -> Result<Option<i64>, AppError> {
        Ok(self
            .claims
            .find_by_correlation_id(correlation_id)
            .await?
            .and_then(|record| record.bound_shop_id))
    }

    /// Bind the record to `shop_id`. `false` means another caller already did.
    pub async fn mark_used(&self, record_id: i64, shop_id: i64) -> Result<bool, AppError> {
        self.mark_used_at(record_id, shop_id, Utc::now()).await
    }

    pub async fn mark_used_at(
        &self,
        record_id: i64,
        shop_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let flipped = self.claims.mark_used(record_id, shop_id, at).await?;
        metrics::record_redemption(if flipped { "redeemed" } else { "already_used" });
        Ok(flipped)
    }
}

fn reject(reason: RejectReason, record_id: Option<i64>) -> AppError {
    metrics::record_redemption(reason.as_str());
    tracing::warn!(reason = %reason, record_id, "location token rejected");
    AppError::InvalidOrExpiredToken
}
