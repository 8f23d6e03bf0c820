use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::AppState;

pub mod handlers;
pub mod identity;

/// Full application router: health, metrics and the API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
}

/// Build the API router.
/// All routes are relative; `app` mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let admin = Router::new()
        .route(
            "/location-tokens",
            get(handlers::list_location_tokens).post(handlers::issue_location_token),
        )
        .route_layer(middleware::from_fn_with_state(state, admin_auth));

    Router::new()
        .nest("/admin", admin)
        .route("/shops/register", post(handlers::register_shop))
        .route("/shops/mine", get(handlers::my_shops))
        .route("/shops/nearby", get(handlers::nearby_shops))
        .route(
            "/shops/:id",
            get(handlers::get_shop).put(handlers::update_shop),
        )
        .route(
            "/shops/:id/rates",
            get(handlers::list_rates).post(handlers::upsert_rate),
        )
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match state.claims.ping().await {
        Ok(()) => "ok".into_response(),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

async fn metrics_handler() -> Response {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        crate::metrics::encode_metrics(),
    )
        .into_response()
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured admin key.
/// Returns 401 if missing/invalid, 500 if no admin key is configured.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = state.config.admin_key.as_deref().ok_or_else(|| {
        tracing::error!("FOREX_ADMIN_KEY is not set; admin API disabled");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 && k.is_char_boundary(4) && k.is_char_boundary(k.len() - 4) {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// Middleware: propagates the caller's `X-Request-Id` (or assigns one) to
/// the response and to every log line of the request.
pub async fn request_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", request_id = %id);
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    resp
}
