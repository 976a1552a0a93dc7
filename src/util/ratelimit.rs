use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http::HeaderMap;
use tracing::instrument;

use crate::constants::{RATELIMIT_REMAINING_HEADER, RATELIMIT_RESET_HEADER};

/// Rate-limit bucket state reported by the last response from a rate-limited API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Requests left in the current window
    pub remaining: u64,
    /// Unix timestamp (seconds) at which the window resets
    pub reset: i64,
}

impl RateLimit {
    /// Reads the bucket state from `Ratelimit-Remaining` and `Ratelimit-Reset` response headers.
    ///
    /// Returns `None` if either header is missing or unparseable.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let remaining = read(RATELIMIT_REMAINING_HEADER)?.trim().parse().ok()?;
        let reset = read(RATELIMIT_RESET_HEADER)?.trim().parse().ok()?;

        Some(Self { remaining, reset })
    }

    /// How long a caller should hold off before its next request, given the current Unix time.
    ///
    /// Only an exhausted bucket with a reset time still in the future produces a wait.
    pub fn wait_duration(&self, now: i64) -> Option<Duration> {
        if self.remaining > 0 {
            return None;
        }

        let diff = self.reset.saturating_sub(now);
        (diff > 0).then(|| Duration::from_secs(diff as u64))
    }
}

/// Invoked by an API client after every response it receives, before the response is handled
#[async_trait]
pub trait RateLimitHandler: fmt::Debug + Send + Sync {
    async fn on_response(&self, limit: &RateLimit);
}

/// Suspends the calling task until an exhausted rate-limit window resets.
///
/// The wait is a `tokio` sleep, so only the request that observed the exhausted bucket is held;
/// there is no cap on its length and no way to cancel it short of dropping the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResetWaiter;

#[async_trait]
impl RateLimitHandler for ResetWaiter {
    #[instrument(skip(self))]
    async fn on_response(&self, limit: &RateLimit) {
        let Some(wait) = limit.wait_duration(Utc::now().timestamp()) else {
            return;
        };

        tracing::info!(
            wait_secs = wait.as_secs(),
            reset = limit.reset,
            "waiting on rate limit to pass before sending next request"
        );

        tokio::time::sleep(wait).await;
    }
}
