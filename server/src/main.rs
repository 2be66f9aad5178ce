//! Spotwatch HTTP server.
//!
//! Sensor reconciliation and spot reservations for a parking facility.

use anyhow::Context;
use spotwatch_core::engine::{EngineEnvironment, ParkingEngine};
use spotwatch_core::environment::SystemClock;
use spotwatch_core::notifier::BroadcastSink;
use spotwatch_runtime::circuit_breaker::CircuitBreakerConfig;
use spotwatch_runtime::metrics::MetricsExporter;
use spotwatch_runtime::payment::ResilientGateway;
use spotwatch_runtime::scheduler::SweepScheduler;
use spotwatch_server::payment_gateway::MockPaymentGateway;
use spotwatch_server::{AppState, Config, build_router};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (and .env) before tracing so RUST_LOG from .env applies
    let config = Config::from_env().context("Failed to load configuration")?;

    let default_filter = format!(
        "spotwatch_server={level},spotwatch_core={level},spotwatch_runtime={level},tower_http=debug",
        level = config.server.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Spotwatch server");
    info!(
        bind = %config.bind_address(),
        hourly_rate_cents = config.payment.hourly_rate_cents,
        sweep_interval_secs = config.sweep.interval_secs,
        "Configuration loaded"
    );

    // Metrics
    let mut exporter = MetricsExporter::new();
    if config.server.metrics_enabled {
        exporter.install().context("Failed to install metrics recorder")?;
    }
    let exporter = Arc::new(exporter);

    // Engine and collaborators
    let gateway = Arc::new(ResilientGateway::new(
        MockPaymentGateway::shared(),
        CircuitBreakerConfig::builder()
            .failure_threshold(config.payment.breaker_failures)
            .timeout(Duration::from_secs(config.payment.breaker_reset_secs))
            .build(),
        config.payment_timeout(),
    ));
    let breaker = gateway.breaker().clone();
    let notifications = BroadcastSink::new(config.notifications.capacity);
    let engine = Arc::new(ParkingEngine::new(
        config.engine_config(),
        EngineEnvironment::new(
            Arc::new(SystemClock),
            gateway,
            Arc::new(notifications.clone()),
        ),
    ));
    info!("Parking engine initialized");

    // Background expiry sweeps
    let scheduler = SweepScheduler::new(Arc::clone(&engine), config.sweep_interval()).spawn();

    // HTTP server
    let state = AppState::new(Arc::clone(&engine), notifications)
        .with_metrics(exporter)
        .with_payment_breaker(breaker)
        .with_recent_readings_limit(config.server.recent_readings_limit);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, shutting down sweep scheduler");
    match tokio::time::timeout(config.shutdown_timeout(), scheduler.shutdown()).await {
        Ok(sweeps) => info!(sweeps, "Sweep scheduler stopped"),
        Err(_) => warn!("Sweep scheduler did not stop within the shutdown timeout"),
    }

    info!("Spotwatch server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
