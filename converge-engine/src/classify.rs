//! Transient-error classifier.
//!
//! Every [`ApiError`] maps to exactly one [`ErrorClass`], and retryability is
//! a function of the class alone. Unknown codes and unstructured errors land
//! in [`ErrorClass::Unknown`], which is never retried.

use std::collections::HashMap;

use crate::error::ApiError;

/// Category of a collaborator error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Rate limiting.
    Throttled,
    /// Service busy or temporarily unavailable.
    Unavailable,
    /// Another operation is in progress on the object, or it is in a state
    /// that does not accept the call yet.
    Conflict,
    /// The request timed out on the wire.
    NetworkTimeout,
    NotFound,
    Validation,
    Forbidden,
    Malformed,
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorClass::Throttled
            | ErrorClass::Unavailable
            | ErrorClass::Conflict
            | ErrorClass::NetworkTimeout => true,
            ErrorClass::NotFound
            | ErrorClass::Validation
            | ErrorClass::Forbidden
            | ErrorClass::Malformed
            | ErrorClass::Unknown => false,
        }
    }
}

const THROTTLED: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequests",
    "OTSTooFrequentReservedThroughputAdjustment",
];

const UNAVAILABLE: &[&str] = &[
    "ServiceUnavailable",
    "ServiceBusy",
    "InternalError",
    "OTSServerBusy",
    "OTSServerUnavailable",
    "OTSPartitionUnavailable",
    "OTSTimeout",
];

const CONFLICT: &[&str] = &[
    "OperationConflict",
    "ConcurrentModification",
    "IncorrectStatus",
    "IncorrectInstanceStatus",
    "LastTokenProcessing",
    "TaskConflict",
    "OTSRowOperationConflict",
];

const NOT_FOUND: &[&str] = &[
    "NotFound",
    "ResourceNotFound",
    "EntityNotExist",
    "OTSObjectNotExist",
];

const VALIDATION: &[&str] = &["ValidationError", "QuotaExceeded", "OTSParameterInvalid"];

const FORBIDDEN: &[&str] = &[
    "Forbidden",
    "AccessDenied",
    "UnauthorizedOperation",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "OTSAuthFailed",
];

const MALFORMED: &[&str] = &[
    "MalformedRequest",
    "InvalidAction",
    "MissingParameter",
    "UnsupportedOperation",
];

/// Classifies collaborator errors. Cheap to clone; extend per resource type
/// with [`Classifier::with_retryable_codes`] and friends.
#[derive(Debug, Clone)]
pub struct Classifier {
    codes: HashMap<String, ErrorClass>,
}

impl Default for Classifier {
    fn default() -> Self {
        let tables: [(&[&str], ErrorClass); 7] = [
            (THROTTLED, ErrorClass::Throttled),
            (UNAVAILABLE, ErrorClass::Unavailable),
            (CONFLICT, ErrorClass::Conflict),
            (NOT_FOUND, ErrorClass::NotFound),
            (VALIDATION, ErrorClass::Validation),
            (FORBIDDEN, ErrorClass::Forbidden),
            (MALFORMED, ErrorClass::Malformed),
        ];
        let codes = tables
            .iter()
            .flat_map(|(codes, class)| codes.iter().map(move |c| (c.to_string(), *class)))
            .collect();
        Self { codes }
    }
}

impl Classifier {
    /// Assign `class` to an exact error code, overriding the built-in table.
    pub fn with_code(mut self, code: impl Into<String>, class: ErrorClass) -> Self {
        self.codes.insert(code.into(), class);
        self
    }

    /// Codes that mean "object busy, try again" for a particular resource
    /// type, e.g. `"OTSIndexBuilding"`.
    pub fn with_retryable_codes<I, S>(self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        codes
            .into_iter()
            .fold(self, |c, code| c.with_code(code, ErrorClass::Conflict))
    }

    /// Codes that mean the object does not exist.
    pub fn with_not_found_codes<I, S>(self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        codes
            .into_iter()
            .fold(self, |c, code| c.with_code(code, ErrorClass::NotFound))
    }

    pub fn classify(&self, err: &ApiError) -> ErrorClass {
        match err {
            ApiError::Service { code, .. } => self.classify_code(code),
            ApiError::Transport {
                timed_out: true, ..
            } => ErrorClass::NetworkTimeout,
            // Connection reset / refused / EOF: the service never answered.
            ApiError::Transport {
                timed_out: false, ..
            } => ErrorClass::Unavailable,
            ApiError::Other(_) => ErrorClass::Unknown,
        }
    }

    pub fn is_retryable(&self, err: &ApiError) -> bool {
        self.classify(err).is_retryable()
    }

    pub fn is_not_found(&self, err: &ApiError) -> bool {
        self.classify(err) == ErrorClass::NotFound
    }

    fn classify_code(&self, code: &str) -> ErrorClass {
        if let Some(class) = self.codes.get(code) {
            return *class;
        }
        // Dotted code families, e.g. "Throttling.User", "InvalidVpcId.NotFound".
        if code.starts_with("Throttling.") {
            ErrorClass::Throttled
        } else if code.ends_with(".NotFound") || code.starts_with("NotFound.") {
            ErrorClass::NotFound
        } else if code.starts_with("Forbidden.") {
            ErrorClass::Forbidden
        } else if code.starts_with("IncorrectStatus.") || code.starts_with("OperationConflict.")
        {
            ErrorClass::Conflict
        } else if code.starts_with("Invalid") {
            ErrorClass::Validation
        } else {
            ErrorClass::Unknown
        }
    }
}
