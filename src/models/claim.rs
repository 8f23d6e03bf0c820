use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted claim-token record. The plaintext token is never stored.
///
/// `used_at` and `bound_shop_id` are either both null or both set; the store
/// writes them together in a single conditional update.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClaimToken {
    pub id: i64,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub correlation_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub bound_shop_id: Option<i64>,
    pub issued_by_admin_id: i64,
    pub created_at: DateTime<Utc>,
}

impl ClaimToken {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Insert payload for a freshly issued claim token.
#[derive(Debug, Clone)]
pub struct NewClaimToken {
    pub token_hash: String,
    pub correlation_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub expires_at: DateTime<Utc>,
    pub issued_by_admin_id: i64,
}
