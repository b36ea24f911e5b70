//! Rollcall Notification Worker
//!
//! Periodically, per tenant:
//! 1. Scans open attendance sessions
//! 2. Notifies learners whose sessions have gone stale
//! 3. Force-closes sessions open past the staleness ceiling

mod processor;

use crate::processor::{NotificationProcessor, NotifyConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use rollcall_common::{
    clock::SystemClock, config::AppConfig, db::DbPool, mail::create_mailer, metrics,
    store::PgStore, VERSION,
};
use std::sync::Arc;
use tracing::{error, info, Level};

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

    info!("Starting Rollcall Notification Worker v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

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
    let store = Arc::new(PgStore::new(db));

    // Initialize mail transport
    let mailer = create_mailer(
        &config.mail.provider,
        config.mail.relay_url.clone(),
        config.mail.api_key.clone(),
        config.mail.timeout_secs,
    )?;
    info!(provider = mailer.provider_name(), "Mail transport initialized");

    let processor = NotificationProcessor::new(
        store,
        Arc::new(SystemClock),
        mailer,
        NotifyConfig {
            stale_session_ceiling_hours: config.jobs.stale_session_ceiling_hours,
        },
    );

    // Single-shot mode for schedulers and manual runs
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "once" {
        let report = processor.run().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // Service mode: run on a fixed cadence until shutdown
    let interval = config.job_interval();
    info!(interval_secs = interval.as_secs(), "Notification worker ready");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = processor.run().await {
                    error!(error = %e, "Notification run failed");
                }
            }
        }
    }

    info!("Notification worker shutting down");
    Ok(())
}
