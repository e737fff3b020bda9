//! Retry decorator for [`AgentPort`]: wraps any transport and retries
//! transient failures (timeouts, connection hiccups) with exponential
//! backoff and jitter, bounded by both a retry count and a wall-clock
//! ceiling — whichever is hit first ends the retry loop and the last error
//! propagates to the Orchestrator.

use std::time::Duration;

use codeloop_kernel::error::RunError;
use codeloop_kernel::ports::{AgentPort, AgentRequest, AgentResponse, BoxFuture};
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub wall_clock_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            wall_clock_ceiling: Duration::from_secs(60),
        }
    }
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp_ms = policy
        .base_delay
        .as_millis()
        .saturating_mul(1u128 << attempt.saturating_sub(1).min(16));
    let exp_ms = exp_ms.min(u64::MAX as u128) as u64;
    let jitter_ms = rand::thread_rng().gen_range(0..=exp_ms / 2 + 1);
    Duration::from_millis(exp_ms + jitter_ms)
}

fn is_retryable(err: &RunError) -> bool {
    matches!(
        err,
        RunError::TransportTimeout(_) | RunError::TransportTransient(_)
    )
}

/// Wraps an inner [`AgentPort`], retrying [`RunError::TransportTimeout`] and
/// [`RunError::TransportTransient`] failures. Every other error kind (auth,
/// protocol violation, UI failure) passes straight through on the first try.
pub struct RetryingAgent<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: AgentPort> RetryingAgent<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        RetryingAgent { inner, policy }
    }
}

impl<A: AgentPort> AgentPort for RetryingAgent<A> {
    fn submit<'a>(&'a self, request: AgentRequest) -> BoxFuture<'a, Result<AgentResponse, RunError>> {
        Box::pin(async move {
            let started = tokio::time::Instant::now();
            let mut attempt = 0u32;
            loop {
                let outcome = self.inner.submit(request.clone()).await;
                let err = match outcome {
                    Ok(response) => return Ok(response),
                    Err(e) if !is_retryable(&e) => return Err(e),
                    Err(e) => e,
                };

                attempt += 1;
                if attempt > self.policy.max_retries {
                    return Err(err);
                }
                let delay = backoff_delay(&self.policy, attempt);
                if started.elapsed() + delay >= self.policy.wall_clock_ceiling {
                    return Err(err);
                }
                tokio::time::sleep(delay).await;
            }
        })
    }
}
