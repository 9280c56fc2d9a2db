//! Server initialization and routing
//!
//! This module handles the Axum server setup including:
//! - Wiring the aggregator from configuration (providers, cache, limiter)
//! - Router configuration with the weather and stats endpoints
//! - Request tracing and timeouts
//! - Graceful shutdown handling

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{BoxError, Router, error_handling::HandleErrorLayer, routing::get};
use tower::{ServiceBuilder, timeout::error::Elapsed};
use tower_http::trace::TraceLayer;
use weather_core::{
    CacheBackend, Config, InMemoryCache, RedisCache, StatsTracker, TokenBucketLimiter,
    WeatherAggregator, WeatherCache, providers_from_config,
};

use crate::{error::ServerError, routes};

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    pub aggregator: WeatherAggregator,
}

impl AppState {
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let providers = providers_from_config(config)?;

        let cache: Arc<dyn WeatherCache> = match config.cache.backend {
            CacheBackend::Redis => Arc::new(
                RedisCache::connect(&config.cache.redis_url, config.cache.ttl())
                    .await
                    .with_context(|| {
                        format!("Failed to initialize cache at {}", config.cache.redis_url)
                    })?,
            ),
            CacheBackend::Memory => Arc::new(InMemoryCache::new(config.cache.ttl())),
        };

        let limiter = Arc::new(TokenBucketLimiter::new(
            config.rate_limit.requests,
            config.rate_limit.window(),
        )?);

        let aggregator =
            WeatherAggregator::new(providers, cache, limiter, Arc::new(StatsTracker::new()));

        Ok(Self { aggregator })
    }
}

pub fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/weather", get(routes::get_weather))
        .route("/stats", get(routes::get_stats))
        .fallback(routes::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn middleware failures into the usual error envelope.
async fn handle_middleware_error(err: BoxError) -> ServerError {
    if err.is::<Elapsed>() {
        ServerError::Timeout
    } else {
        ServerError::Internal(err.to_string())
    }
}

/// Start the HTTP server and block until shutdown.
///
/// The server handles graceful shutdown on:
/// - SIGTERM (Unix/Linux)
/// - Ctrl+C (all platforms)
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(&config).await?);
    tracing::info!(aggregator = ?state.aggregator, "aggregator ready");

    let app = build_router(state, Duration::from_secs(config.server.request_timeout_secs));

    let addr: SocketAddr = format!("{}:{}", config.server.bind_addr, config.server.port)
        .parse()
        .context("Invalid bind address")?;

    tracing::info!(
        %addr,
        cache = ?config.cache.backend,
        rate_limit = %format!("{}/{}ms", config.rate_limit.requests, config.rate_limit.window_ms),
        "starting weather server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
