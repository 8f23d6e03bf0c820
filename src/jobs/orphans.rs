//! Background job: delete shops that no claim token binds.
//!
//! Registration creates the shop before binding the token, so a crash in
//! between leaves an unbound shop. Every shop is created through
//! registration, so an unbound shop older than the grace period is always
//! such a leftover.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time;

use crate::store::{ShopStore, StoreError};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Spawn the sweep loop. Call this once at startup.
pub fn spawn(shops: Arc<dyn ShopStore>, grace: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = sweep_once(shops.as_ref(), grace, Utc::now()).await {
                tracing::error!("orphan sweep failed: {}", e);
            }
        }
    })
}

/// Delete unbound shops created more than `grace` before `now`.
pub async fn sweep_once(
    shops: &dyn ShopStore,
    grace: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let removed = shops.delete_orphaned_shops(now - grace).await?;
    if removed > 0 {
        tracing::info!(rows = removed, "deleted orphaned shops");
    }
    Ok(removed)
}
