//! vax-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, builds
//! the shared state, wires middleware, and starts the HTTP server. All route
//! handlers live in `routes.rs`; all shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use vax_auth::JwtKeys;
use vax_daemon::{routes, state};
use vax_db::PgStore;
use vax_lifecycle::SystemClock;
use vax_notify::{NoopNotifier, NotifyChannel, TracingMailer, TracingNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = vax_config::Config::load().context("load config")?;
    info!(fingerprint = %cfg.fingerprint()?, "config loaded");

    let db_url = cfg
        .database_url
        .clone()
        .context("database_url is not configured (set VAX_DATABASE_URL)")?;
    let pool = vax_db::connect(&db_url).await?;
    vax_db::migrate(&pool).await?;

    let secret = cfg
        .jwt_secret
        .clone()
        .context("jwt_secret is not configured (set VAX_JWT_SECRET)")?;

    let notifier: Arc<dyn NotifyChannel> = if cfg.notifications_enabled {
        Arc::new(TracingNotifier)
    } else {
        Arc::new(NoopNotifier)
    };

    let shared = Arc::new(state::AppState::new(
        Arc::new(PgStore::new(pool)),
        notifier,
        Arc::new(TracingMailer),
        JwtKeys::from_secret(&secret),
        Arc::new(SystemClock),
    ));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr '{}'", cfg.bind_addr))?;
    info!("vax-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(tower_http::cors::Any)
}
