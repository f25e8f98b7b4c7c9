//! converge-engine: asynchronous resource reconciliation.
//!
//! Cloud control planes accept a mutation and apply it later. This crate
//! wraps a single mutating call in a transient-error-aware retry loop, then
//! polls the remote object until it reaches a target lifecycle state, enters
//! a failure state, or the caller's budget runs out.
//!
//! # Example
//! ```ignore
//! use converge_engine::{Orchestrator, StateSet};
//!
//! let orchestrator = Orchestrator::default();
//! let states = StateSet::new()
//!     .pending(["Creating"])
//!     .target(["Running"])
//!     .fail(["CreateFailed"]);
//! let report = orchestrator.create(&index, &states, timeout).await;
//! let final_state = report.into_result()?;
//! ```

pub mod backoff;
pub mod classify;
pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod outcome;
pub mod poll;
pub mod retry;

pub use backoff::BackoffPolicy;
pub use classify::{Classifier, ErrorClass};
pub use config::{EngineConfig, Settings, Timeouts};
pub use error::{ApiError, ConfigError, IdentityError, Phase, ReconcileError};
pub use identity::ResourceId;
pub use lifecycle::{
    Change, ClientToken, Operation, Orchestrator, Reconciliation, RemoteResource,
};
pub use outcome::{Attempt, Failure, Outcome};
pub use poll::{Convergence, PollSettings, Polled, StateSet, WhenAbsent, wait_for};
pub use retry::{Retried, retry};
