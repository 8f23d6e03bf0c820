use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forexfinder::config::{self, Config};
use forexfinder::store::memory::MemoryStore;
use forexfinder::store::postgres::PgStore;
use forexfinder::{api, jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured; stdout logging always.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "forexfinder"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "forexfinder=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, in_memory).await
        }
        Some(cli::Commands::Token { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let state = AppState::new(Arc::new(db), cfg);
            handle_token_command(command, &state).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, false).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16, in_memory: bool) -> anyhow::Result<()> {
    let state = if in_memory {
        if cfg.is_production() {
            anyhow::bail!("--in-memory is not allowed when FOREX_ENV=production");
        }
        tracing::warn!("Using in-memory store; all state is lost on exit");
        Arc::new(AppState::new(Arc::new(MemoryStore::new()), cfg))
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url).await?;

        tracing::info!("Running migrations...");
        db.migrate().await?;

        Arc::new(AppState::new(Arc::new(db), cfg))
    };

    let app = api::app(state.clone())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let web_origin = std::env::var("FOREX_WEB_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == web_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-admin-id"),
                    HeaderName::from_static("x-user-id"),
                    HeaderName::from_static("x-request-id"),
                ])
        })
        .layer(axum::middleware::from_fn(api::request_id))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    jobs::orphans::spawn(state.shops.clone(), state.config.orphan_grace());
    tracing::info!(
        grace_minutes = state.config.orphan_grace_minutes,
        "Background orphan sweep started (every 10m)"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("forexfinder listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Issued tokens must never land in a shared cache
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_token_command(cmd: cli::TokenCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Issue {
            lat,
            lng,
            admin_id,
            ttl_days,
        } => {
            let issued = state.issuer.issue(lat, lng, admin_id, ttl_days).await?;
            println!(
                "Location token issued:\n  Record:   {}\n  Expires:  {}\n  Token:    {}\n\nStore this token securely; it will not be shown again.",
                issued.record_id, issued.expires_at, issued.token
            );
        }
        cli::TokenCommands::List { admin_id } => {
            let tokens = state.claims.list_claims(admin_id).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!(
                    "{:<8} {:<38} {:<24} {:<26} {:<10}",
                    "ID", "CORRELATION", "COORDINATES", "EXPIRES", "SHOP"
                );
                for t in tokens {
                    let shop = t
                        .bound_shop_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "{:<8} {:<38} {:<24} {:<26} {:<10}",
                        t.id,
                        t.correlation_id,
                        format!("{:.5},{:.5}", t.latitude, t.longitude),
                        t.expires_at.to_rfc3339(),
                        shop
                    );
                }
            }
        }
    }
    Ok(())
}

