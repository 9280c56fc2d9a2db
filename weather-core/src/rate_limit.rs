//! Admission control in front of the upstream providers.
//!
//! The limiter is a token bucket holding `requests` permits, refilled
//! continuously at `requests / window`, and starting full.

use std::{fmt::Debug, num::NonZeroU32, time::Duration};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter as GovLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tokio_util::sync::CancellationToken;

use crate::error::RateLimitError;

#[async_trait]
pub trait RateLimiter: Send + Sync + Debug {
    /// Consume a token if one is available right now.
    fn allow(&self) -> bool;

    /// Suspend until a token is available or `cancel` fires.
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError>;
}

#[derive(Debug)]
pub struct TokenBucketLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl TokenBucketLimiter {
    pub fn new(requests: u32, window: Duration) -> Result<Self> {
        let burst = NonZeroU32::new(requests)
            .ok_or_else(|| anyhow!("Rate limit quota must be at least 1 request"))?;

        let period = window / requests;
        let quota = Quota::with_period(period)
            .ok_or_else(|| {
                anyhow!("Rate limit window {window:?} is too short for {requests} requests")
            })?
            .allow_burst(burst);

        Ok(Self { limiter: GovLimiter::direct(quota) })
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            _ = self.limiter.until_ready() => Ok(()),
        }
    }
}
