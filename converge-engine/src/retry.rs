//! Transient-error-aware retry executor.
//!
//! One call in flight at a time; the executor sleeps between attempts and
//! never starts an attempt whose preceding backoff would overrun the budget.
//! Any attempt, failed or not, may have reached the remote side.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::classify::Classifier;
use crate::error::ApiError;
use crate::outcome::{Attempt, Failure, Outcome};

/// Result of [`retry`]: the outcome plus every attempt made.
#[derive(Debug)]
pub struct Retried<T> {
    pub outcome: Outcome<T>,
    pub attempts: Vec<Attempt>,
}

/// Invoke `operation` until it succeeds, fails with a non-retryable error, or
/// the next backoff delay would exceed `timeout`.
pub async fn retry<T, F, Fut>(
    operation: F,
    policy: &BackoffPolicy,
    classifier: &Classifier,
    timeout: Duration,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    retry_until(operation, policy, classifier, deadline_after(timeout)).await
}

pub(crate) async fn retry_until<T, F, Fut>(
    mut operation: F,
    policy: &BackoffPolicy,
    classifier: &Classifier,
    deadline: Instant,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempts = Vec::new();
    let mut number: u32 = 0;

    loop {
        let at = Utc::now();
        let err = match operation().await {
            Ok(value) => {
                attempts.push(Attempt {
                    number,
                    at,
                    error: None,
                });
                return Retried {
                    outcome: Outcome::Succeeded(value),
                    attempts,
                };
            }
            Err(err) => err,
        };
        attempts.push(Attempt {
            number,
            at,
            error: Some(err.clone()),
        });

        let class = classifier.classify(&err);
        if !class.is_retryable() {
            warn!(attempt = number, class = ?class, error = %err, "Non-retryable error");
            return Retried {
                outcome: Outcome::FailedFast(Failure::Api(err)),
                attempts,
            };
        }

        let delay = policy.delay(number);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || delay > remaining {
            warn!(
                attempts = number + 1,
                error = %err,
                remaining_ms = remaining.as_millis() as u64,
                "Retry budget exhausted"
            );
            return Retried {
                outcome: Outcome::FailedAfterRetries {
                    error: err,
                    attempts: number + 1,
                },
                attempts,
            };
        }

        debug!(
            attempt = number,
            class = ?class,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Retryable error, backing off"
        );
        sleep(delay).await;
        number += 1;
    }
}

/// Deadline `timeout` from now, saturating far in the future.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}
