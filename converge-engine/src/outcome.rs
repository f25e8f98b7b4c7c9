//! Terminal results of the executor, the poller and the orchestrator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::{ApiError, IdentityError, Phase, ReconcileError};
use crate::identity::ResourceId;

/// Why an operation failed without waiting out its budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Failure {
    /// Non-retryable collaborator error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The object reported one of the caller's failure states.
    #[error("resource entered failure state {0:?}")]
    FailureState(String),

    /// The object disappeared while a target state was expected.
    #[error("resource disappeared after {checks} consecutive absent observations")]
    Vanished { checks: u32 },

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Exactly one of these is produced per executor, poller or orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Succeeded(T),
    FailedFast(Failure),
    FailedAfterRetries { error: ApiError, attempts: u32 },
    TimedOut {
        /// Most recent observation; `None` if the object was absent or never
        /// observed.
        last_state: Option<String>,
        elapsed: Duration,
    },
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    /// Split off the success value; any other outcome is re-typed so it can be
    /// passed on unchanged.
    pub fn succeeded<U>(self) -> Result<T, Outcome<U>> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::FailedFast(failure) => Err(Outcome::FailedFast(failure)),
            Outcome::FailedAfterRetries { error, attempts } => {
                Err(Outcome::FailedAfterRetries { error, attempts })
            }
            Outcome::TimedOut {
                last_state,
                elapsed,
            } => Err(Outcome::TimedOut {
                last_state,
                elapsed,
            }),
        }
    }

    /// Convert into a typed error carrying the phase and identity it
    /// happened in.
    pub fn into_result(
        self,
        phase: Phase,
        identity: Option<ResourceId>,
    ) -> Result<T, ReconcileError> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::FailedFast(Failure::Api(source)) => Err(ReconcileError::Fatal {
                phase,
                identity,
                source,
            }),
            Outcome::FailedFast(Failure::FailureState(state)) => {
                Err(ReconcileError::ConvergenceFailed {
                    identity,
                    state: Some(state),
                })
            }
            Outcome::FailedFast(Failure::Vanished { .. }) => {
                Err(ReconcileError::ConvergenceFailed {
                    identity,
                    state: None,
                })
            }
            Outcome::FailedFast(Failure::Identity(source)) => {
                Err(ReconcileError::Identity { phase, source })
            }
            Outcome::FailedAfterRetries { error, attempts } => {
                Err(ReconcileError::RetriesExhausted {
                    phase,
                    identity,
                    attempts,
                    last: error,
                })
            }
            Outcome::TimedOut {
                last_state,
                elapsed,
            } => Err(ReconcileError::ConvergenceTimeout {
                identity,
                last_state,
                elapsed,
            }),
        }
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded(_) => "succeeded",
            Outcome::FailedFast(_) => "failed-fast",
            Outcome::FailedAfterRetries { .. } => "failed-after-retries",
            Outcome::TimedOut { .. } => "timed-out",
        }
    }
}

/// One invocation of a mutating call. Lives only as long as the report that
/// carries it.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 0-based.
    pub number: u32,
    pub at: DateTime<Utc>,
    pub error: Option<ApiError>,
}
