//! Gridcast HTTP server.
//!
//! Event-sourced multiplayer crossword backend: append-only streams,
//! snapshot-aware projections, real-time fan-out across instances.

use gridcast_core::clock::SystemClock;
use gridcast_core::solve::SolveService;
use gridcast_postgres::{PostgresEventStore, PostgresPuzzleCatalog, PostgresSolveStore};
use gridcast_redis::RedisEventBus;
use gridcast_server::{build_router, AppState, Config};
use gridcast_hub::StreamHub;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridcast=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gridcast server");

    let config = Config::from_env();
    info!(
        postgres_url = %config.postgres.url,
        redis = config.redis.url.is_some(),
        "Configuration loaded"
    );

    // Event store (source of truth)
    info!("Connecting to event store database...");
    let store = Arc::new(PostgresEventStore::new(&config.postgres.url).await?);
    store.run_migrations().await?;
    info!("Event store ready");

    // Optional cross-instance bus
    let bus: Option<Arc<dyn gridcast_core::bus::EventBus>> = match &config.redis.url {
        Some(url) => {
            info!("Connecting to Redis bus...");
            Some(Arc::new(RedisEventBus::new(url).await?))
        }
        None => {
            warn!("REDIS_URL not set; running single-instance without cross-instance fan-out");
            None
        }
    };

    let clock = Arc::new(SystemClock);
    let catalog = Arc::new(PostgresPuzzleCatalog::new(store.pool().clone()));
    let solve_store = Arc::new(PostgresSolveStore::new(store.pool().clone()));
    let solves = Arc::new(SolveService::new(
        store.clone(),
        solve_store,
        clock.clone(),
    ));

    let hub = Arc::new(StreamHub::new(
        store.clone(),
        bus,
        clock.clone(),
        config.hub_config(),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        catalog,
        solves,
        hub: hub.clone(),
        clock,
    };

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down; closing hub");
    hub.close();
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
