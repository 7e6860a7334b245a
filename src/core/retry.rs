//! Retry loop bounded by a maximum elapsed duration.
//!
//! Every attempt is classified; a policy with `should_retry == false` ends the
//! loop immediately. Otherwise the scheduler sleeps for the next backoff
//! interval and tries again, unless that sleep would carry the loop past the
//! maximum retry duration, in which case the last attempt's outcome is kept.

use crate::core::error_handling::{ErrorClassifier, ErrorPolicy, ResponseStatus};
use crate::domain::ports::{HttpResponse, NoResponse};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Default first interval for exponential backoff.
pub const DEFAULT_EXPONENTIAL_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fixed delay between attempts.
    Linear { interval: Duration },
    /// Delay doubles after every attempt, starting at `base`.
    Exponential { base: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: DEFAULT_EXPONENTIAL_BASE,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn interval(&self, retry: u32) -> Duration {
        match *self {
            Self::Linear { interval } => interval,
            Self::Exponential { base } => base.saturating_mul(1u32 << retry.min(31)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryState {
    Waiting,
    Requesting,
    Succeeded,
    TimedOut,
}

/// Result of the retry loop for one record. Call-local; never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// `Succeeded` or `TimedOut`.
    pub state: RetryState,
    pub status: ResponseStatus,
    /// `None` when the last attempt got no response.
    pub response: Option<HttpResponse>,
    pub policy: ErrorPolicy,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    max_duration: Duration,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, max_duration: Duration) -> Self {
        Self {
            policy,
            max_duration,
        }
    }

    /// Runs `send` until a non-retryable outcome or the duration bound.
    ///
    /// `initial_delay` is waited once before the first attempt; it paces
    /// successive records, not successive retries.
    pub async fn run<F, Fut>(
        &self,
        initial_delay: Duration,
        classifier: &ErrorClassifier,
        mut send: F,
    ) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, NoResponse>>,
    {
        let mut state = RetryState::Waiting;
        if !initial_delay.is_zero() {
            tracing::debug!("⏳ {:?}: waiting {:?} before first attempt", state, initial_delay);
            tokio::time::sleep(initial_delay).await;
        }

        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            state = RetryState::Requesting;
            attempts += 1;

            let (status, response) = match send().await {
                Ok(response) => (ResponseStatus::Code(response.status), Some(response)),
                Err(e) => {
                    tracing::debug!("📡 attempt {}: {}", attempts, e);
                    (ResponseStatus::NoResponse, None)
                }
            };
            let policy = classifier.classify(status);
            tracing::debug!(
                "📡 {:?}: attempt {} returned {} (retry: {})",
                state,
                attempts,
                status,
                policy.should_retry
            );

            if !policy.should_retry {
                return RetryOutcome {
                    state: RetryState::Succeeded,
                    status,
                    response,
                    policy,
                    attempts,
                };
            }

            let delay = self.policy.interval(attempts - 1);
            if started.elapsed().saturating_add(delay) > self.max_duration {
                tracing::debug!(
                    "⌛ retries exhausted after {} attempts in {:?}, last status {}",
                    attempts,
                    started.elapsed(),
                    status
                );
                return RetryOutcome {
                    state: RetryState::TimedOut,
                    status,
                    response,
                    policy,
                    attempts,
                };
            }

            state = RetryState::Waiting;
            tracing::debug!("🔁 {:?}: retrying in {:?}", state, delay);
            tokio::time::sleep(delay).await;
        }
    }
}
