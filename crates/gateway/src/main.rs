//! Rollcall API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Caller context extraction and role checks
//! - Request routing to the attendance engine
//! - Observability (logging, metrics, tracing)

mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use rollcall_common::{
    clock::SystemClock,
    config::AppConfig,
    db::DbPool,
    metrics,
    store::{AttendanceStore, PgStore},
};
use rollcall_engine::AttendanceEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn AttendanceStore>,
    pub engine: Arc<AttendanceEngine>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Rollcall API Gateway v{}", rollcall_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn AttendanceStore> = Arc::new(PgStore::new(db));

    // Create app state
    let engine = Arc::new(AttendanceEngine::new(store.clone(), Arc::new(SystemClock)));
    let state = AppState {
        config: config.clone(),
        store,
        engine,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Learner attendance endpoints
        .route("/attendance/check-in", post(handlers::attendance::check_in))
        .route(
            "/attendance/sessions/{id}/heartbeat",
            post(handlers::attendance::heartbeat),
        )
        .route(
            "/attendance/sessions/{id}/check-out",
            post(handlers::attendance::check_out),
        )
        .route(
            "/attendance/sessions/{id}/self-checkout",
            get(handlers::attendance::self_checkout_info),
        )
        .route(
            "/attendance/sessions/{id}/self-checkout",
            post(handlers::attendance::self_checkout),
        )
        // Administrative endpoints
        .route(
            "/admin/sessions/{id}/close",
            post(handlers::admin::close_session),
        )
        .route(
            "/admin/sessions/{id}",
            delete(handlers::admin::delete_session),
        );

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
