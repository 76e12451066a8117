//! Key Shop Backend Server
//!
//! Serves the key shop API: catalog and purchases, balance top-ups with
//! receipt screening, promo codes and the staff back office.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use keyshop_server::auth::AuthService;
use keyshop_server::catalog::Catalog;
use keyshop_server::config::{Config, StorageKind};
use keyshop_server::coordinator::{CoordinatorSettings, TransactionCoordinator};
use keyshop_server::db::{self, PgBackend};
use keyshop_server::events::EventBus;
use keyshop_server::maintenance;
use keyshop_server::middleware::RateLimiter;
use keyshop_server::receipt::{HttpOcr, NoopOcr, OcrEngine};
use keyshop_server::routes::app_router;
use keyshop_server::state::AppState;
use keyshop_server::store::{FileBackend, LedgerStore, StorageBackend, StoreSettings};
use keyshop_server::users::Role;

/// Login and chat-link attempts allowed per client per minute
const LOGIN_ATTEMPTS_PER_MINUTE: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting key shop server");

    let backend: Arc<dyn StorageBackend> = match config.storage {
        StorageKind::File => {
            tracing::info!(data_dir = %config.data_dir.display(), "Using file storage");
            Arc::new(FileBackend::open(&config.data_dir).await?)
        }
        StorageKind::Postgres => {
            tracing::info!(
                url = config.database_url_masked().unwrap_or_default(),
                "Connecting to database..."
            );
            let pool = db::create_pool(&config).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Database connected successfully");
            Arc::new(PgBackend::new(pool))
        }
    };

    let store = Arc::new(LedgerStore::new(backend, StoreSettings::from_config(&config)));
    let flusher = store.spawn_flusher();

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path)
            .await
            .with_context(|| format!("loading catalog from {}", path.display()))?,
        None => {
            tracing::warn!("CATALOG_PATH not set, using the built-in catalog");
            Catalog::builtin()
        }
    };

    let ocr: Arc<dyn OcrEngine> = match &config.ocr_service_url {
        Some(url) => Arc::new(HttpOcr::new(url.clone(), config.ocr_timeout)?),
        None => {
            tracing::warn!("OCR_SERVICE_URL not set, receipts are screened by hash only");
            Arc::new(NoopOcr)
        }
    };

    let shop = TransactionCoordinator::new(
        store.clone(),
        Arc::new(catalog),
        ocr,
        EventBus::default(),
        CoordinatorSettings::from_config(&config),
    );

    if let Some((username, password)) = &config.bootstrap_admin {
        if shop.users().find_by_username(username).await?.is_none() {
            let admin = shop.users().create_user(username, password, Role::Admin).await?;
            tracing::info!(user_id = admin.id, username = %admin.username, "Bootstrap admin created");
        }
    }

    let auth_service = AuthService::new(
        shop.users().clone(),
        config.jwt_secret.clone(),
        config.jwt_access_token_ttl_seconds,
    );
    let api_limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
    let login_limiter = RateLimiter::per_minute(LOGIN_ATTEMPTS_PER_MINUTE);

    let housekeeping = maintenance::spawn(
        shop.clone(),
        vec![api_limiter.clone(), login_limiter.clone()],
        config.cleanup_interval,
    );

    let app_state = AppState::new(shop, auth_service, api_limiter, login_limiter);
    let app = app_router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(configure_cors(&config)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    housekeeping.abort();
    flusher.abort();
    match store.flush().await {
        Ok(flushed) => tracing::info!(flushed, "Final ledger flush complete"),
        Err(e) => tracing::error!(error = %e, pending = ?store.pending_writes().await, "Final ledger flush failed"),
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins_str = config.cors_allowed_origins.clone().unwrap_or_default();

    if allowed_origins_str.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
