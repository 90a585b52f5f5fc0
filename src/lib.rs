pub mod adaptive;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;

use crate::adaptive::AdaptiveLimiter;
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{gate_handler, GateState};
use crate::rate_limit::SlidingWindowLimiter;
use axum::{routing::get, Router};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Build the axum app: every path is gated, except the optional metrics path
pub fn build_app(state: GateState, metrics: Option<(String, MetricsService)>) -> Router {
    let mut app = Router::new();

    if let Some((path, service)) = metrics {
        app = app.route(&path, get(metrics_handler).with_state(service));
    }

    app.fallback(gate_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Check the upstream target given on the command line
pub fn validate_upstream(upstream: &str) -> Result<()> {
    let url = reqwest::Url::parse(upstream)
        .map_err(|e| GateError::Config(format!("Invalid upstream URL '{}': {}", upstream, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(GateError::Config(format!(
            "Upstream URL must use http or https, got '{}'",
            scheme
        ))),
    }
}

/// Start the gate and run until a shutdown signal arrives
pub async fn init_gate(config: GateConfig, upstream: String) -> Result<()> {
    config.validate()?;
    validate_upstream(&upstream)?;

    info!("Starting fluxgate");
    info!(upstream = %upstream, listen_addr = %config.listen_addr, "Gating upstream");

    let metrics = if config.metrics.enabled {
        Some((config.metrics.path.clone(), MetricsService::new()?))
    } else {
        None
    };

    // The gate must not start without the shared window
    let shared = Arc::new(
        SlidingWindowLimiter::connect(&config.redis, config.window_capacity()).await?,
    );

    let adaptive = Arc::new(AdaptiveLimiter::new(
        config.rate,
        config.bucket_size,
        config.adaptive.baseline_mode,
    ));

    run_gate(&config, shared, adaptive, upstream, metrics, CancellationToken::new()).await
}

/// Run the control loop and the server until `shutdown` fires or serving fails
///
/// The control loop is stopped and the shared limiter closed on every exit.
pub async fn run_gate(
    config: &GateConfig,
    shared: Arc<SlidingWindowLimiter>,
    adaptive: Arc<AdaptiveLimiter>,
    upstream: String,
    metrics: Option<(String, MetricsService)>,
    shutdown: CancellationToken,
) -> Result<()> {
    let control_loop = adaptive.start(config.adaptive.update_interval(), shutdown.child_token());

    let served = serve(config, shared.clone(), adaptive, upstream, metrics, &shutdown).await;

    shutdown.cancel();
    if let Err(e) = control_loop.await {
        error!(error = %e, "Adaptive control loop ended abnormally");
    }
    shared.close();

    match &served {
        Ok(()) => info!("Gate stopped"),
        Err(e) => error!(error = %e, "Gate stopped with an error"),
    }
    served
}

/// Bind the listener and serve until `shutdown` fires and in-flight requests
/// drain or the shutdown timeout passes
async fn serve(
    config: &GateConfig,
    shared: Arc<SlidingWindowLimiter>,
    adaptive: Arc<AdaptiveLimiter>,
    upstream: String,
    metrics: Option<(String, MetricsService)>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let state = GateState::new(shared, adaptive, upstream, &config.upstream)?;
    let app = build_app(state, metrics);

    let listener = tokio::net::TcpListener::bind(config.listen_socket_addr()?)
        .await
        .map_err(GateError::Io)?;

    info!("Gate ready to accept connections");

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = shutdown_signal() => shutdown.cancel(),
                _ = shutdown.cancelled() => {}
            }
        }
    });

    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    tokio::select! {
        result = server.into_future() => {
            result.map_err(|e| GateError::Internal(format!("Server error: {}", e)))?;
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(timeout_secs = grace.as_secs(), "In-flight requests did not finish before the shutdown timeout");
        }
    }

    Ok(())
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fluxgate=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
