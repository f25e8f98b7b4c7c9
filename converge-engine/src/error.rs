//! Error types for the reconciliation engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::identity::ResourceId;

/// Phase of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The mutating call is being issued (and retried).
    Requesting,
    /// Waiting for the remote object to settle.
    Converging,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Requesting => write!(f, "requesting"),
            Phase::Converging => write!(f, "converging"),
        }
    }
}

/// Invalid engine parameters. Raised at construction, never mid-operation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A parameter is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`crate::config::EngineConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Error returned by a collaborator call (mutating call or describe probe).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Structured error from the vendor API.
    #[error("{code}: {message}")]
    Service {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// The request did not produce a response.
    #[error("transport error: {message}")]
    Transport { message: String, timed_out: bool },

    /// Anything without a code. Never retried.
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Service {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// A request that timed out on the wire.
    pub fn timeout(message: impl Into<String>) -> Self {
        ApiError::Transport {
            message: message.into(),
            timed_out: true,
        }
    }

    /// A connection-level failure (reset, refused, EOF).
    pub fn transport(message: impl Into<String>) -> Self {
        ApiError::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn with_request_id(self, id: impl Into<String>) -> Self {
        match self {
            ApiError::Service { code, message, .. } => ApiError::Service {
                code,
                message,
                request_id: Some(id.into()),
            },
            other => other,
        }
    }

    /// Vendor error code, if the error carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Malformed composite identity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity {id:?} has {actual} components, expected {expected}")]
    ComponentCount {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("identity needs at least one component")]
    NoComponents,

    #[error("component {index} ({component:?}) contains the separator '{separator}'")]
    SeparatorInComponent {
        index: usize,
        component: String,
        separator: char,
    },
}

/// Terminal error of a reconciliation, with enough context to report verbatim.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Non-retryable collaborator error.
    #[error("{phase} failed{}: {source}", on(.identity))]
    Fatal {
        phase: Phase,
        identity: Option<ResourceId>,
        #[source]
        source: ApiError,
    },

    /// Retryable errors persisted past the timeout budget.
    #[error("{phase} gave up after {attempts} attempts{}: {last}", on(.identity))]
    RetriesExhausted {
        phase: Phase,
        identity: Option<ResourceId>,
        attempts: u32,
        #[source]
        last: ApiError,
    },

    /// The remote object reached an explicit failure state, or vanished.
    #[error("resource{} {}", on(.identity), failed_state(.state))]
    ConvergenceFailed {
        identity: Option<ResourceId>,
        state: Option<String>,
    },

    /// Neither target nor failure state was reached in time.
    #[error(
        "timed out after {elapsed:?} waiting for resource{}, last observed state: {}",
        on(.identity),
        last_observed(.last_state)
    )]
    ConvergenceTimeout {
        identity: Option<ResourceId>,
        last_state: Option<String>,
        elapsed: Duration,
    },

    /// The mutating call was accepted but its response yields no usable
    /// identity, so the remote object may exist untracked.
    #[error(
        "request accepted during {phase} but its identity is unusable, \
         the remote object may be orphaned: {source}"
    )]
    Identity {
        phase: Phase,
        #[source]
        source: IdentityError,
    },
}

impl ReconcileError {
    pub fn identity(&self) -> Option<&ResourceId> {
        match self {
            ReconcileError::Fatal { identity, .. }
            | ReconcileError::RetriesExhausted { identity, .. }
            | ReconcileError::ConvergenceFailed { identity, .. }
            | ReconcileError::ConvergenceTimeout { identity, .. } => identity.as_ref(),
            ReconcileError::Identity { .. } => None,
        }
    }
}

fn on(identity: &Option<ResourceId>) -> String {
    match identity {
        Some(id) => format!(" on {}", id),
        None => String::new(),
    }
}

fn last_observed(state: &Option<String>) -> &str {
    state.as_deref().unwrap_or("none")
}

fn failed_state(state: &Option<String>) -> String {
    match state {
        Some(s) => format!("entered failure state {:?}", s),
        None => "disappeared before reaching its target state".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let id = ResourceId::new(["inst", "tbl", "idx"]).unwrap();
        let err = ReconcileError::Fatal {
            phase: Phase::Requesting,
            identity: Some(id.clone()),
            source: ApiError::service("Forbidden.RAM", "denied"),
        };
        assert_eq!(
            err.to_string(),
            "requesting failed on inst:tbl:idx: Forbidden.RAM: denied"
        );

        let err = ReconcileError::ConvergenceTimeout {
            identity: Some(id),
            last_state: Some("Creating".to_string()),
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 5s waiting for resource on inst:tbl:idx, last observed state: Creating"
        );
    }

    #[test]
    fn test_identity_error_mentions_accepted_request() {
        let err = ReconcileError::Identity {
            phase: Phase::Requesting,
            source: IdentityError::NoComponents,
        };
        assert_eq!(
            err.to_string(),
            "request accepted during requesting but its identity is unusable, \
             the remote object may be orphaned: identity needs at least one component"
        );
        assert!(err.identity().is_none());
    }

    #[test]
    fn test_vanished_resource_message() {
        let err = ReconcileError::ConvergenceFailed {
            identity: None,
            state: None,
        };
        assert_eq!(
            err.to_string(),
            "resource disappeared before reaching its target state"
        );
    }

    #[test]
    fn test_request_id_only_applies_to_service_errors() {
        let err = ApiError::service("Throttling", "slow down").with_request_id("req-1");
        assert!(matches!(
            err,
            ApiError::Service { request_id: Some(ref r), .. } if r == "req-1"
        ));
        assert_eq!(err.code(), Some("Throttling"));

        let err = ApiError::timeout("read timed out").with_request_id("req-2");
        assert_eq!(err, ApiError::timeout("read timed out"));
        assert_eq!(err.code(), None);
    }
}
