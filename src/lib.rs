//! forexfinder: location claim tokens and proximity-ranked exchange rate search.
//!
//! The binary in `main.rs` wires these modules to Postgres and serves the
//! router from `api`; integration tests in `tests/` drive the same code over
//! `MemoryStore`.

use std::sync::Arc;

pub mod api;
pub mod claims;
pub mod config;
pub mod errors;
pub mod geo;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod ranking;
pub mod registration;
pub mod store;

use claims::{ClaimSigner, TokenIssuer, TokenRedeemer};
use ranking::ProximityRanker;
use registration::RegistrationOrchestrator;
use store::{ClaimStore, RateStore, ShopStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub issuer: TokenIssuer,
    pub registration: RegistrationOrchestrator,
    pub ranker: ProximityRanker,
    pub claims: Arc<dyn ClaimStore>,
    pub shops: Arc<dyn ShopStore>,
    pub rates: Arc<dyn RateStore>,
    pub config: config::Config,
}

impl AppState {
    /// Build all components over one store implementing every trait.
    pub fn new<S>(store: Arc<S>, config: config::Config) -> Self
    where
        S: ClaimStore + ShopStore + RateStore + 'static,
    {
        Self::from_parts(store.clone(), store.clone(), store, config)
    }

    pub fn from_parts(
        claims: Arc<dyn ClaimStore>,
        shops: Arc<dyn ShopStore>,
        rates: Arc<dyn RateStore>,
        config: config::Config,
    ) -> Self {
        let signer = Arc::new(ClaimSigner::new(config.token_secret.as_bytes()));
        let issuer = TokenIssuer::new(claims.clone(), signer.clone(), config.default_ttl_days);
        let redeemer = TokenRedeemer::new(claims.clone(), signer);
        let registration = RegistrationOrchestrator::new(redeemer, shops.clone());
        let ranker = ProximityRanker::new(rates.clone());

        Self {
            issuer,
            registration,
            ranker,
            claims,
            shops,
            rates,
            config,
        }
    }
}
