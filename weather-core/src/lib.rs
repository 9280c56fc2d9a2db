//! Core library for the weather aggregation service.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Abstraction over weather providers, with OpenWeather and WeatherAPI adapters
//! - Cache-aside storage (Redis or in-process), token-bucket admission and counters
//! - [`WeatherAggregator`], which races all providers and returns the first success
//!
//! It is used by `weather-server`, but the aggregator takes every collaborator
//! as a trait object so other binaries (or tests) can plug in their own.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod rate_limit;
pub mod stats;

pub use aggregator::{DEFAULT_FANOUT_TIMEOUT, RacePolicy, WeatherAggregator};
pub use cache::{InMemoryCache, RedisCache, WeatherCache};
pub use config::{CacheBackend, Config, ProviderConfig};
pub use error::{CacheError, RateLimitError, ResolveError};
pub use model::{StatsSnapshot, WeatherRecord};
pub use provider::{ProviderId, WeatherProvider, providers_from_config};
pub use rate_limit::{RateLimiter, TokenBucketLimiter};
pub use stats::StatsTracker;

pub use tokio_util::sync::CancellationToken;
