//! Request orchestration: cache-aside lookup, admission control and a
//! first-success-wins race across every configured provider.
//!
//! ```text
//! resolve(city)
//!   ├─ cache.get ── hit ──────────────────────────────▶ record (cached)
//!   │     └─ miss / backend fault
//!   ├─ limiter.allow ── denied ───────────────────────▶ RateLimited
//!   ├─ spawn one task per provider ─▶ completion channel
//!   ├─ first event: success │ failure │ timeout
//!   └─ cache.set (best effort) ───────────────────────▶ record
//! ```
//!
//! Losing provider tasks are not cancelled by the aggregator. They keep
//! running until they finish or the caller's token fires, and whatever
//! they send after the race is decided is dropped with the channel.

use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cache::WeatherCache, error::ResolveError, model::WeatherRecord, provider::WeatherProvider,
    rate_limit::RateLimiter, stats::StatsTracker,
};

/// How long the fan-out waits for a winning provider.
pub const DEFAULT_FANOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a provider failure does to an undecided race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RacePolicy {
    /// The first event decides, so a fast failure aborts the resolution even
    /// if a slower provider would have succeeded.
    #[default]
    FailFast,
    /// Keep waiting for a success until every provider has failed or the
    /// timeout elapses.
    FirstSuccess,
}

struct ProviderFailure {
    provider: String,
    error: anyhow::Error,
}

impl From<ProviderFailure> for ResolveError {
    fn from(failure: ProviderFailure) -> Self {
        ResolveError::Provider { provider: failure.provider, message: format!("{:#}", failure.error) }
    }
}

type Outcome = Result<WeatherRecord, ProviderFailure>;

pub struct WeatherAggregator {
    providers: Vec<Arc<dyn WeatherProvider>>,
    cache: Arc<dyn WeatherCache>,
    limiter: Arc<dyn RateLimiter>,
    stats: Arc<StatsTracker>,
    fanout_timeout: Duration,
    race_policy: RacePolicy,
}

impl fmt::Debug for WeatherAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("WeatherAggregator")
            .field("providers", &names)
            .field("cache", &self.cache)
            .field("limiter", &self.limiter)
            .field("fanout_timeout", &self.fanout_timeout)
            .field("race_policy", &self.race_policy)
            .finish()
    }
}

impl WeatherAggregator {
    pub fn new(
        providers: Vec<Arc<dyn WeatherProvider>>,
        cache: Arc<dyn WeatherCache>,
        limiter: Arc<dyn RateLimiter>,
        stats: Arc<StatsTracker>,
    ) -> Self {
        Self {
            providers,
            cache,
            limiter,
            stats,
            fanout_timeout: DEFAULT_FANOUT_TIMEOUT,
            race_policy: RacePolicy::default(),
        }
    }

    pub fn with_fanout_timeout(mut self, timeout: Duration) -> Self {
        self.fanout_timeout = timeout;
        self
    }

    pub fn with_race_policy(mut self, policy: RacePolicy) -> Self {
        self.race_policy = policy;
        self
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    /// Resolve current weather for `city`.
    ///
    /// `cancel` is handed to every provider call; the aggregator itself
    /// never fires it.
    pub async fn resolve(
        &self,
        city: &str,
        cancel: &CancellationToken,
    ) -> Result<WeatherRecord, ResolveError> {
        // Every call counts, including ones rejected for a blank city.
        self.stats.increment_requests();

        let city = city.trim();
        if city.is_empty() {
            return Err(ResolveError::EmptyCity);
        }

        match self.cache.get(city).await {
            Ok(Some(record)) => {
                self.stats.increment_cache_hits();
                debug!(city, source = %record.source, "cache hit");
                return Ok(record);
            }
            Ok(None) => {
                self.stats.increment_cache_misses();
                debug!(city, "cache miss");
            }
            Err(err) => {
                self.stats.increment_cache_misses();
                warn!(city, error = %err, "cache lookup failed, fetching live");
            }
        }

        if !self.limiter.allow() {
            self.stats.increment_rate_limit_hits();
            warn!(city, "rate limit exceeded");
            return Err(ResolveError::RateLimited);
        }

        let record = self.fan_out(city, cancel).await?;

        if let Err(err) = self.cache.set(city, &record).await {
            error!(city, error = %err, "cache write failed");
        }

        info!(city, source = %record.source, "weather resolved");
        Ok(record)
    }

    async fn fan_out(
        &self,
        city: &str,
        cancel: &CancellationToken,
    ) -> Result<WeatherRecord, ResolveError> {
        if self.providers.is_empty() {
            return Err(ResolveError::NoProviders);
        }

        debug!(city, providers = self.providers.len(), "fetching from providers");

        // Capacity covers every provider, so late senders never block.
        let (tx, mut rx) = mpsc::channel::<Outcome>(self.providers.len());

        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let stats = Arc::clone(&self.stats);
            let tx = tx.clone();
            let city = city.to_string();
            let cancel = cancel.child_token();

            tokio::spawn(async move {
                stats.increment_api_calls();

                let outcome = match provider.get_weather(&city, &cancel).await {
                    Ok(record) => {
                        debug!(provider = provider.name(), city = %city, "provider answered");
                        Ok(record)
                    }
                    Err(error) => {
                        let reason = format!("{error:#}");
                        warn!(provider = provider.name(), city = %city, error = %reason, "provider failed");
                        Err(ProviderFailure { provider: provider.name().to_string(), error })
                    }
                };

                // Err here just means the race is already over.
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.fanout_timeout);
        tokio::pin!(deadline);

        let mut pending = self.providers.len();
        let mut last_failure: Option<ProviderFailure> = None;

        loop {
            tokio::select! {
                biased;
                outcome = rx.recv() => match outcome {
                    Some(Ok(record)) => return Ok(record),
                    Some(Err(failure)) => {
                        pending -= 1;
                        if self.race_policy == RacePolicy::FailFast || pending == 0 {
                            return Err(failure.into());
                        }
                        last_failure = Some(failure);
                    }
                    // Every task is gone without reporting: they panicked.
                    None => {
                        return Err(last_failure.map(ResolveError::from).unwrap_or_else(|| {
                            ResolveError::Provider {
                                provider: "unknown".to_string(),
                                message: "provider task ended without a result".to_string(),
                            }
                        }));
                    }
                },
                _ = &mut deadline => {
                    warn!(city, timeout_ms = self.fanout_timeout.as_millis() as u64, "all providers timed out");
                    return Err(ResolveError::AllProvidersTimedOut { timeout: self.fanout_timeout });
                }
            }
        }
    }
}
