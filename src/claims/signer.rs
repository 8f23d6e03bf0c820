use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RejectReason;

/// Signed payload of a location claim token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationClaims {
    pub lat: f64,
    pub lng: f64,
    pub admin_id: i64,
    /// Correlation id of the persisted record.
    pub cid: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer/verifier bound to one shared secret.
pub struct ClaimSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl ClaimSigner {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the caller's clock in `verify`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn sign(&self, claims: &LocationClaims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Verify the signature, then reject claims whose `exp` lies before `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<LocationClaims, RejectReason> {
        let data = decode::<LocationClaims>(token, &self.decoding, &self.validation)
            .map_err(|_| RejectReason::BadSignature)?;
        if data.claims.exp < now.timestamp() {
            return Err(RejectReason::ClaimExpired);
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for ClaimSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimSigner").finish_non_exhaustive()
    }
}
