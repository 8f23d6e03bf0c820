use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use super::hash::hash_token;
use super::signer::{ClaimSigner, LocationClaims};
use crate::errors::AppError;
use crate::geo::Coordinates;
use crate::metrics;
use crate::models::NewClaimToken;
use crate::store::ClaimStore;

pub const MIN_TTL_DAYS: i64 = 1;
pub const MAX_TTL_DAYS: i64 = 365;
const SECONDS_PER_DAY: i64 = 86_400;

/// Plaintext token handed to the issuing admin exactly once.
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub record_id: i64,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"****")
            .field("expires_at", &self.expires_at)
            .field("record_id", &self.record_id)
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    claims: Arc<dyn ClaimStore>,
    signer: Arc<ClaimSigner>,
    default_ttl_days: i64,
}

impl TokenIssuer {
    pub fn new(claims: Arc<dyn ClaimStore>, signer: Arc<ClaimSigner>, default_ttl_days: i64) -> Self {
        Self {
            claims,
            signer,
            default_ttl_days,
        }
    }

    pub async fn issue(
        &self,
        latitude: f64,
        longitude: f64,
        admin_id: i64,
        ttl_days: Option<i64>,
    ) -> Result<IssuedToken, AppError> {
        self.issue_at(latitude, longitude, admin_id, ttl_days, Utc::now())
            .await
    }

    /// Issue a token as if the clock read `now`.
    #[tracing::instrument(skip(self, now))]
    pub async fn issue_at(
        &self,
        latitude: f64,
        longitude: f64,
        admin_id: i64,
        ttl_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AppError> {
        let coords = Coordinates::new(latitude, longitude)?;
        let ttl_days = ttl_days.unwrap_or(self.default_ttl_days);
        if !(MIN_TTL_DAYS..=MAX_TTL_DAYS).contains(&ttl_days) {
            return Err(AppError::validation(format!(
                "expiration must be {} to {} days, got {}",
                MIN_TTL_DAYS, MAX_TTL_DAYS, ttl_days
            )));
        }

        let iat = now.timestamp();
        let exp = iat + ttl_days * SECONDS_PER_DAY;
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| AppError::Issuance("expiry out of range".into()))?;

        let claims = LocationClaims {
            lat: coords.latitude,
            lng: coords.longitude,
            admin_id,
            cid: Uuid::new_v4(),
            iat,
            exp,
        };
        let token = self
            .signer
            .sign(&claims)
            .map_err(|e| AppError::Issuance(format!("signing failed: {}", e)))?;

        let record = self
            .claims
            .insert_claim(&NewClaimToken {
                token_hash: hash_token(&token),
                correlation_id: claims.cid,
                latitude: coords.latitude,
                longitude: coords.longitude,
                expires_at,
                issued_by_admin_id: admin_id,
            })
            .await
            // `token` is dropped on this path and never leaves the issuer
            .map_err(|e| AppError::Issuance(format!("could not persist claim: {}", e)))?;

        metrics::record_issued();
        tracing::info!(
            record_id = record.id,
            correlation_id = %claims.cid,
            %expires_at,
            "location token issued"
        );

        Ok(IssuedToken {
            token,
            expires_at,
            record_id: record.id,
        })
    }
}
