//! Location claim tokens: issuance, hashed storage, verification and
//! single-use redemption.
//!
//! A token is an HS256 JWT carrying the claimed coordinates and a random
//! correlation id. The store keeps only a salted hash of the full token
//! string, so a database leak yields no redeemable tokens. Redemption checks,
//! in order:
//!
//! 1. signature and `exp` (before touching the store)
//! 2. record lookup by correlation id
//! 3. constant-time hash comparison
//! 4. not already used
//! 5. stored expiry
//!
//! Every rejection except "already used" surfaces as the same opaque error.

pub mod hash;
pub mod issuer;
pub mod redeemer;
pub mod signer;

pub use issuer::{IssuedToken, TokenIssuer};
pub use redeemer::{Redemption, TokenRedeemer};
pub use signer::{ClaimSigner, LocationClaims};

/// Internal rejection cause. Logged, counted, never returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BadSignature,
    ClaimExpired,
    UnknownRecord,
    HashMismatch,
    RecordExpired,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::BadSignature => "bad_signature",
            RejectReason::ClaimExpired => "claim_expired",
            RejectReason::UnknownRecord => "unknown_record",
            RejectReason::HashMismatch => "hash_mismatch",
            RejectReason::RecordExpired => "record_expired",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
