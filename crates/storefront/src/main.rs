//! Kumas Storefront - checkout, payment settlement and image delivery.
//!
//! This binary serves the storefront API on port 3000.
//!
//! # Architecture
//!
//! - Axum web framework, JSON APIs consumed by the shop frontend
//! - `PostgreSQL` for catalog, orders, coupons, stock and rate-limit counters
//! - iyzico checkout form for payments
//! - Filesystem object storage for image originals and derived variants
//!
//! Migrations are NOT run on startup. Run them explicitly via
//! `kumas migrate`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use kumas_storefront::config::{RateLimitBackend, StorefrontConfig};
use kumas_storefront::db::{self, PgCatalog, PgOrderStore};
use kumas_storefront::images::RasterTransformer;
use kumas_storefront::middleware::{
    FallbackRateLimiter, InMemoryRateLimiter, PgRateLimiter, RateLimiter,
};
use kumas_storefront::payment::IyzicoClient;
use kumas_storefront::services::email::EmailNotifier;
use kumas_storefront::services::notifications::{
    DEFAULT_QUEUE_CAPACITY, LogNotifier, NotificationQueue, Notifier,
};
use kumas_storefront::storage::FilesystemStore;
use kumas_storefront::{AppState, Collaborators};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the notification worker may take to drain after shutdown.
const NOTIFICATION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry.dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry
                .environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry.sample_rate,
            traces_sample_rate: config.sentry.traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn notifier(config: &StorefrontConfig) -> Arc<dyn Notifier> {
    match &config.smtp {
        Some(smtp) => match EmailNotifier::new(smtp) {
            Ok(email) => Arc::new(email),
            Err(e) => {
                tracing::error!(error = %e, "SMTP relay misconfigured, logging notifications instead");
                Arc::new(LogNotifier)
            }
        },
        None => {
            tracing::warn!("SMTP not configured, order confirmations will only be logged");
            Arc::new(LogNotifier)
        }
    }
}

fn rate_limiter(config: &StorefrontConfig, pool: &sqlx::PgPool) -> Arc<dyn RateLimiter> {
    let limits = &config.rate_limit;
    let memory = Arc::new(InMemoryRateLimiter::new(limits.max_requests, limits.window));
    match limits.backend {
        RateLimitBackend::Memory => memory,
        RateLimitBackend::Postgres => Arc::new(FallbackRateLimiter::new(
            Arc::new(PgRateLimiter::new(
                pool.clone(),
                limits.max_requests,
                limits.window,
            )),
            memory,
        )),
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kumas_storefront=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    let objects = FilesystemStore::new(&config.images.storage_root)
        .await
        .expect("Failed to open object storage");
    let gateway = IyzicoClient::new(&config.payment).expect("Failed to build payment client");

    let (notifications, notification_worker) =
        NotificationQueue::start(notifier(&config), DEFAULT_QUEUE_CAPACITY);

    let state = AppState::new(
        config.clone(),
        Collaborators {
            catalog: Arc::new(PgCatalog::new(pool.clone())),
            orders: Arc::new(PgOrderStore::new(pool.clone())),
            gateway: Arc::new(gateway),
            objects: Arc::new(objects),
            transformer: Arc::new(RasterTransformer),
            rate_limiter: rate_limiter(&config, &pool),
            notifications,
            pool: Some(pool),
        },
    );

    let app = kumas_storefront::router(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("storefront listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    // The router (and with it every queue sender) is gone; let queued
    // confirmations go out before exiting.
    if tokio::time::timeout(NOTIFICATION_DRAIN_TIMEOUT, notification_worker)
        .await
        .is_err()
    {
        tracing::warn!("Notification worker did not drain in time");
    }
    tracing::info!("Shutdown complete");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
