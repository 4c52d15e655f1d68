//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but application-level
//! errors should use `kernel::error::AppError`.

mod routes;

use axum::{
    Router, http,
    http::{Method, header},
};
use guard::{
    CounterStore, CounterStoreConfig, Guard, GuardConfig, MemoryCounterStore, PgCounterStore,
    RateLimiter, RateLimiterSettings, RedisCounterStore, StoreFailurePolicy,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-export unified error types for use in handlers
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,guard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GuardConfig::from_env()?;
    tracing::info!(config = ?config, "Guard configuration loaded");

    let settings = RateLimiterSettings::from(&config);

    match config.store.clone() {
        CounterStoreConfig::InProcess => {
            tracing::warn!("No shared counter store configured; limits are per process");
            serve(&config, RateLimiter::<MemoryCounterStore>::in_process(settings)).await
        }
        CounterStoreConfig::Redis { url } => {
            // A bad URL is a config error; an unreachable server is a store failure.
            let store = RedisCounterStore::open(&url)?;
            let warm_up = match tokio::time::timeout(config.store_timeout, store.connection()).await
            {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("connect timed out".to_string()),
            };
            if let Some(error) = warm_up {
                tracing::warn!(
                    error = %error,
                    policy = config.failure_policy.as_str(),
                    "Redis unavailable at startup, applying failure policy until it connects"
                );
            }
            serve(&config, RateLimiter::new(store, settings)).await
        }
        CounterStoreConfig::Postgres { url } => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(config.store_timeout.max(Duration::from_secs(1)))
                .connect_lazy(&url)?;

            let store = PgCounterStore::new(pool.clone());
            tokio::spawn(prepare_database(
                pool,
                store.clone(),
                config.store_retry_after.max(Duration::from_secs(1)),
            ));

            serve(&config, RateLimiter::new(store, settings)).await
        }
    }
}

/// Run migrations and startup cleanup, retrying until the database answers
///
/// Until this succeeds, counter calls fail and the failure policy applies.
async fn prepare_database(pool: PgPool, store: PgCounterStore, retry_after: Duration) {
    loop {
        match sqlx::migrate!("../../../database/migrations").run(&pool).await {
            Ok(()) => {
                tracing::info!("Migrations completed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Database not ready, retrying migrations");
                tokio::time::sleep(retry_after).await;
            }
        }
    }

    // Startup cleanup: remove expired counters
    // Errors here should not prevent serving
    if let Err(e) = store.cleanup_expired().await {
        tracing::warn!(
            error = %e,
            "Rate limit cleanup failed, continuing anyway"
        );
    }
}

async fn serve<S>(config: &GuardConfig, limiter: RateLimiter<S>) -> anyhow::Result<()>
where
    S: CounterStore + Send + Sync + 'static,
{
    if limiter.has_shared_store() && config.failure_policy == StoreFailurePolicy::Fallback {
        tracing::info!(
            "Store failures degrade to process-local counters; \
             with N instances the effective limit can reach N times the configured one"
        );
    }

    let guard = Guard::new(config, limiter);

    // CORS configuration
    let frontend_origins = env::var("FRONTEND_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:40922,http://127.0.0.1:40922".to_string());

    let allowed_origins: Vec<http::HeaderValue> = frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::ACCEPT,
            config.csrf_header_name.clone(),
        ]))
        .expose_headers([
            header::RETRY_AFTER,
            guard::presentation::headers::X_RATELIMIT_LIMIT,
            guard::presentation::headers::X_RATELIMIT_REMAINING,
            guard::presentation::headers::X_RATELIMIT_RESET,
        ])
        .allow_credentials(true);

    // Build router
    let app = Router::new()
        .nest("/api", routes::api_router(&guard))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:31113".to_string())
        .parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
