use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use front_desk_cell::handlers::FrontDeskState;
use front_desk_cell::services::{FrontDeskDeps, FrontDeskService, InMemoryLedgerStore, SupabaseCollaborators};
use realtime_bus_cell::{EventBus, RedisRelay};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting front desk API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Event bus, optionally fanned out across instances through Redis
    let bus = EventBus::open(config.event_bus_capacity);
    let mut relay_listener = None;
    if let Some(redis_url) = config.redis_url.as_deref() {
        match RedisRelay::connect(redis_url).await {
            Ok(relay) => {
                match relay.spawn_listener(bus.clone()).await {
                    Ok(handle) => relay_listener = Some(handle),
                    Err(e) => warn!("Redis relay listener failed to start: {}", e),
                }
                bus.attach_relay(Arc::new(relay)).await;
                info!("Redis relay attached");
            }
            Err(e) => warn!("Redis relay unavailable, running single-instance: {}", e),
        }
    }

    let collaborators = SupabaseCollaborators::new(Arc::new(SupabaseClient::new(&config)));
    let deps = FrontDeskDeps {
        store: Arc::new(InMemoryLedgerStore::new()),
        catalog: Arc::new(collaborators.clone()),
        accounts: Arc::new(collaborators.clone()),
        records: Arc::new(collaborators),
        publisher: Arc::new(bus.clone()),
    };

    let state = Arc::new(FrontDeskState {
        config: config.clone(),
        service: Arc::new(FrontDeskService::new(&config, deps)),
        bus: bus.clone(),
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    bus.close().await;
    if let Some(listener) = relay_listener {
        listener.abort();
    }
    info!("Front desk API stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
