use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use weather_core::{CancellationToken, StatsSnapshot, WeatherRecord};

use crate::{
    error::{ServerError, ServerResult},
    server::AppState,
};

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub city: Option<String>,
}

/// `GET /weather?city=<name>`
pub async fn get_weather(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeatherQuery>,
) -> ServerResult<Json<WeatherRecord>> {
    // Blank or missing cities still reach the aggregator so they are counted.
    let city = query.city.unwrap_or_default();

    // Provider calls still in flight are cancelled once this request is done.
    let cancel = CancellationToken::new();
    let _request_scope = cancel.clone().drop_guard();

    let record = state.aggregator.resolve(&city, &cancel).await?;
    Ok(Json(record))
}

/// `GET /stats`
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.aggregator.stats().snapshot())
}

pub async fn not_found() -> ServerError {
    ServerError::NotFound
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use weather_core::{
        InMemoryCache, StatsTracker, TokenBucketLimiter, WeatherAggregator, WeatherProvider,
    };

    use super::*;
    use crate::{error::ErrorResponse, server::build_router};

    #[derive(Debug, Default)]
    struct StubProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WeatherProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn get_weather(
            &self,
            city: &str,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<WeatherRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WeatherRecord::observed_now(city, 18.0, 55, "overcast clouds", "stub"))
        }
    }

    #[derive(Debug)]
    struct DownProvider;

    #[async_trait]
    impl WeatherProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn get_weather(
            &self,
            _city: &str,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<WeatherRecord> {
            anyhow::bail!("upstream returned 503")
        }
    }

    #[derive(Debug)]
    struct SlowProvider;

    #[async_trait]
    impl WeatherProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn get_weather(
            &self,
            city: &str,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<WeatherRecord> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(WeatherRecord::observed_now(city, 18.0, 55, "overcast clouds", "slow"))
        }
    }

    fn app(provider: Arc<dyn WeatherProvider>, quota: u32) -> axum::Router {
        app_with_timeout(provider, quota, Duration::from_secs(15))
    }

    fn app_with_timeout(
        provider: Arc<dyn WeatherProvider>,
        quota: u32,
        request_timeout: Duration,
    ) -> axum::Router {
        let aggregator = WeatherAggregator::new(
            vec![provider],
            Arc::new(InMemoryCache::new(Duration::from_secs(60))),
            Arc::new(TokenBucketLimiter::new(quota, Duration::from_secs(3600)).unwrap()),
            Arc::new(StatsTracker::new()),
        );
        build_router(Arc::new(AppState { aggregator }), request_timeout)
    }

    async fn call(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn weather_then_cached_weather() {
        let provider = Arc::new(StubProvider::default());
        let app = app(provider.clone(), 10);

        let (status, body) = call(&app, "/weather?city=Jakarta").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["city"], "Jakarta");
        assert_eq!(body["source"], "stub");
        assert_eq!(body["cached"], false);

        let (status, body) = call(&app, "/weather?city=Jakarta").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], true);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_or_blank_city_is_bad_request() {
        let app = app(Arc::new(StubProvider::default()), 10);

        for uri in ["/weather", "/weather?city=", "/weather?city=%20%20"] {
            let (status, body) = call(&app, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");

            let envelope: ErrorResponse = serde_json::from_value(body).unwrap();
            assert_eq!(envelope.error, "Bad Request");
            assert_eq!(envelope.code, 400);
            assert_eq!(envelope.message, "City parameter is required");
        }
    }

    #[tokio::test]
    async fn exhausted_quota_is_too_many_requests() {
        let app = app(Arc::new(StubProvider::default()), 1);

        let (status, _) = call(&app, "/weather?city=Jakarta").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "/weather?city=Bandung").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], 429);
        assert_eq!(body["message"], "Rate limit exceeded");

        // Cached cities are still served once the quota is gone.
        let (status, body) = call(&app, "/weather?city=Jakarta").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], true);
    }

    #[tokio::test]
    async fn provider_failure_is_service_unavailable() {
        let app = app(Arc::new(DownProvider), 10);

        let (status, body) = call(&app, "/weather?city=Jakarta").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Service Unavailable");
        assert_eq!(body["code"], 503);
        assert_eq!(body["message"], "Failed to fetch weather data");
    }

    #[tokio::test]
    async fn rejected_requests_are_counted() {
        let app = app(Arc::new(StubProvider::default()), 10);

        let (status, _) = call(&app, "/weather?city=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, "/weather").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(&app, "/stats").await;
        let stats: StatsSnapshot = serde_json::from_value(body).unwrap();
        assert_eq!(stats, StatsSnapshot { total_requests: 2, ..Default::default() });
    }

    #[tokio::test]
    async fn stats_reflect_traffic() {
        let app = app(Arc::new(StubProvider::default()), 10);

        call(&app, "/weather?city=Jakarta").await;
        call(&app, "/weather?city=Jakarta").await;

        let (status, body) = call(&app, "/stats").await;
        assert_eq!(status, StatusCode::OK);

        let stats: StatsSnapshot = serde_json::from_value(body).unwrap();
        assert_eq!(
            stats,
            StatsSnapshot {
                total_requests: 2,
                cache_hits: 1,
                cache_misses: 1,
                api_calls: 1,
                rate_limit_hits: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_times_out_with_envelope() {
        let app = app_with_timeout(Arc::new(SlowProvider), 10, Duration::from_millis(500));

        let (status, body) = call(&app, "/weather?city=Jakarta").await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

        let envelope: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.error, "Request Timeout");
        assert_eq!(envelope.code, 408);
        assert_eq!(envelope.message, "Request timed out");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found_envelope() {
        let app = app(Arc::new(StubProvider::default()), 10);

        let (status, body) = call(&app, "/forecast").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
    }
}
