//! Convergence poller.
//!
//! Repeatedly samples remote state through a describe probe until the object
//! reaches a target state, reports a failure state, or the budget runs out.
//! The poller never mutates anything.
//!
//! Conventions:
//! - An empty target set means absence is the goal (delete confirmation).
//! - With a non-empty target set, absence is pending until [`WhenAbsent`]
//!   says otherwise.
//! - States outside both the target and failure sets are pending, whether or
//!   not the caller listed them as pending.
//! - Probe errors the classifier calls not-found are absence signals.
//!   Other transient probe errors are retried with the backoff policy.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::classify::Classifier;
use crate::error::{ApiError, ConfigError};
use crate::outcome::{Failure, Outcome};
use crate::retry::deadline_after;

/// Caller-supplied state sets for one convergence wait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSet {
    pending: HashSet<String>,
    target: HashSet<String>,
    fail: HashSet<String>,
}

/// Classification of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// A listed pending state, or absence while something else is expected.
    Pending,
    Target,
    Failure,
    /// Not listed anywhere. Treated as pending.
    Unknown(String),
}

impl StateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty target set: succeed once the object is gone.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.extend(states.into_iter().map(Into::into));
        self
    }

    pub fn target<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target.extend(states.into_iter().map(Into::into));
        self
    }

    pub fn fail<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail.extend(states.into_iter().map(Into::into));
        self
    }

    /// True when absence is the goal.
    pub fn awaits_absence(&self) -> bool {
        self.target.is_empty()
    }

    /// Classify an observation; `None` is absence. A state listed as both
    /// target and failure counts as failure.
    pub fn evaluate(&self, observed: Option<&str>) -> Convergence {
        match observed {
            None if self.awaits_absence() => Convergence::Target,
            None => Convergence::Pending,
            Some(state) if self.fail.contains(state) => Convergence::Failure,
            Some(state) if self.target.contains(state) => Convergence::Target,
            Some(state) if self.pending.contains(state) => Convergence::Pending,
            Some(state) => Convergence::Unknown(state.to_string()),
        }
    }
}

/// What absence means while a target state is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenAbsent {
    /// Keep waiting until the timeout.
    Pending,
    /// Fail on the first absent observation.
    Fail,
    /// Fail after this many consecutive absent observations.
    FailAfter(u32),
}

/// Pacing of a convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    interval: Duration,
    initial_delay: Duration,
    when_absent: WhenAbsent,
    continuous_target_occurrence: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            initial_delay: Duration::ZERO,
            when_absent: WhenAbsent::FailAfter(20),
            continuous_target_occurrence: 1,
        }
    }
}

impl PollSettings {
    pub fn new(interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::invalid("poll interval", "must be non-zero"));
        }
        Ok(Self {
            interval,
            ..Self::default()
        })
    }

    /// Wait this long before the first probe.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_when_absent(mut self, when_absent: WhenAbsent) -> Self {
        self.when_absent = when_absent;
        self
    }

    /// Require `count` consecutive target observations before succeeding.
    pub fn with_continuous_target_occurrence(mut self, count: u32) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::invalid(
                "continuous target occurrence",
                "must be at least 1",
            ));
        }
        self.continuous_target_occurrence = count;
        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Result of [`wait_for`]. The success value is the final observed state,
/// `None` when absence was the goal.
#[derive(Debug)]
pub struct Polled {
    pub outcome: Outcome<Option<String>>,
    /// Number of probe invocations, failed ones included.
    pub probes: u32,
}

/// Block until the probe reports a target state, a failure state, or
/// `timeout` would be exceeded by the next sleep.
pub async fn wait_for<F, Fut>(
    probe: F,
    states: &StateSet,
    settings: &PollSettings,
    backoff: &BackoffPolicy,
    classifier: &Classifier,
    timeout: Duration,
) -> Polled
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>, ApiError>>,
{
    let started = Instant::now();
    wait_until(
        probe,
        states,
        settings,
        backoff,
        classifier,
        started,
        deadline_after(timeout),
    )
    .await
}

pub(crate) async fn wait_until<F, Fut>(
    mut probe: F,
    states: &StateSet,
    settings: &PollSettings,
    backoff: &BackoffPolicy,
    classifier: &Classifier,
    started: Instant,
    deadline: Instant,
) -> Polled
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>, ApiError>>,
{
    let mut probes: u32 = 0;
    let mut last_state: Option<String> = None;
    let timed_out = |last_state: Option<String>, probes: u32| Polled {
        outcome: Outcome::TimedOut {
            last_state,
            elapsed: started.elapsed(),
        },
        probes,
    };

    if !settings.initial_delay.is_zero() {
        if settings.initial_delay > deadline.saturating_duration_since(Instant::now()) {
            return timed_out(None, 0);
        }
        sleep(settings.initial_delay).await;
    }

    let mut error_attempt: u32 = 0;
    let mut absent_streak: u32 = 0;
    let mut target_streak: u32 = 0;

    loop {
        probes += 1;
        let observed = match probe().await {
            Ok(observed) => observed,
            Err(err) if classifier.is_not_found(&err) => None,
            Err(err) => {
                if !classifier.is_retryable(&err) {
                    warn!(probes, error = %err, "Describe probe failed");
                    return Polled {
                        outcome: Outcome::FailedFast(Failure::Api(err)),
                        probes,
                    };
                }
                let delay = backoff.delay(error_attempt);
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || delay > remaining {
                    warn!(probes, error = %err, "Describe probe kept failing until the deadline");
                    return Polled {
                        outcome: Outcome::FailedAfterRetries {
                            error: err,
                            attempts: error_attempt + 1,
                        },
                        probes,
                    };
                }
                debug!(
                    probes,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Transient probe error, backing off"
                );
                error_attempt += 1;
                sleep(delay).await;
                continue;
            }
        };
        error_attempt = 0;

        match states.evaluate(observed.as_deref()) {
            Convergence::Failure => {
                let state = observed.unwrap_or_default();
                warn!(probes, state = %state, "Resource entered failure state");
                return Polled {
                    outcome: Outcome::FailedFast(Failure::FailureState(state)),
                    probes,
                };
            }
            Convergence::Target => {
                absent_streak = 0;
                target_streak += 1;
                debug!(probes, state = ?observed, streak = target_streak, "Target state observed");
                if target_streak >= settings.continuous_target_occurrence {
                    return Polled {
                        outcome: Outcome::Succeeded(observed),
                        probes,
                    };
                }
            }
            Convergence::Pending if observed.is_none() => {
                target_streak = 0;
                absent_streak += 1;
                debug!(probes, streak = absent_streak, "Resource not visible yet");
                let vanished = match settings.when_absent {
                    WhenAbsent::Pending => false,
                    WhenAbsent::Fail => true,
                    WhenAbsent::FailAfter(limit) => absent_streak >= limit,
                };
                if vanished {
                    warn!(probes, checks = absent_streak, "Resource disappeared");
                    return Polled {
                        outcome: Outcome::FailedFast(Failure::Vanished {
                            checks: absent_streak,
                        }),
                        probes,
                    };
                }
            }
            Convergence::Pending => {
                absent_streak = 0;
                target_streak = 0;
                debug!(probes, state = ?observed, "Still pending");
            }
            Convergence::Unknown(state) => {
                absent_streak = 0;
                target_streak = 0;
                debug!(probes, state = %state, "Unrecognized state, treating as pending");
            }
        }
        last_state = observed;

        if settings.interval > deadline.saturating_duration_since(Instant::now()) {
            warn!(probes, last_state = ?last_state, "Timed out waiting for convergence");
            return timed_out(last_state, probes);
        }
        sleep(settings.interval).await;
    }
}
