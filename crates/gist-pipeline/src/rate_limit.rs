//! Global LLM rate limiting shared by every summarize worker.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;

use gist_llm::{LlmClient, Result};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Decorator that makes any [`LlmClient`] respect a global requests-per-second
/// quota. Token acquisition is atomic, so concurrent workers can never
/// double-spend a permit.
#[derive(Clone)]
pub struct RateLimitedClient<C> {
    inner: C,
    limiter: Arc<DirectRateLimiter>,
}

impl<C> RateLimitedClient<C> {
    /// Wrap `inner` with a sustained `requests_per_second` quota. A zero
    /// rate is clamped to one request per second.
    #[must_use]
    pub fn new(inner: C, requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        Self {
            inner,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
        }
    }
}

impl<C> std::fmt::Debug for RateLimitedClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient").finish_non_exhaustive()
    }
}

impl<C: LlmClient> LlmClient for RateLimitedClient<C> {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        self.limiter.until_ready().await;
        self.inner.complete(prompt, max_output_tokens).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
