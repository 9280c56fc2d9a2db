use std::time::Duration;

/// Failures that cross the aggregator boundary.
///
/// Cache backend faults and provider errors discarded after a winner was
/// chosen are logged inside the aggregator and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("City parameter is required")]
    EmptyCity,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("No weather providers are configured")]
    NoProviders,

    #[error("All providers timed out after {}ms", timeout.as_millis())]
    AllProvidersTimedOut { timeout: Duration },
}

impl ResolveError {
    /// Whether the failure is attributable to upstream availability rather
    /// than to the caller.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ResolveError::Provider { .. }
                | ResolveError::NoProviders
                | ResolveError::AllProvidersTimedOut { .. }
        )
    }
}

/// Cache backend faults. A clean miss is not an error.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache entry (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("wait for a rate limit token was cancelled")]
    Cancelled,
}
