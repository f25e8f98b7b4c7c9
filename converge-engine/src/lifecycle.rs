//! Lifecycle orchestrator.
//!
//! Composes the retry executor (for the single mutating call) and the
//! convergence poller (for confirmation) into the three canonical sequences:
//!
//! - create: request, record identity, converge to a target state
//! - update: request unless nothing changed, converge
//! - delete: request (not-found is success), converge to absence
//!
//! Phases run strictly in order and share one deadline. Every invocation
//! yields exactly one [`Outcome`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::classify::Classifier;
use crate::error::{ApiError, IdentityError, Phase, ReconcileError};
use crate::identity::ResourceId;
use crate::outcome::{Attempt, Failure, Outcome};
use crate::poll::{PollSettings, StateSet, wait_until};
use crate::retry::{deadline_after, retry_until};

/// Client-supplied idempotency token. One per create orchestration, reused
/// by every retry of the mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientToken(Uuid);

impl ClientToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The vendor calls for one resource type.
///
/// Implementations are thin adapters over an already-configured API client;
/// the orchestrator owns retrying and waiting.
#[async_trait]
pub trait RemoteResource: Send + Sync {
    /// Response of the create call.
    type Created: Send;

    /// Issue the create call. `token` is identical across retries.
    async fn create(&self, token: &ClientToken) -> Result<Self::Created, ApiError>;

    /// Derive the composite identity from the create response.
    fn identity(&self, created: &Self::Created) -> Result<ResourceId, IdentityError>;

    /// Called as soon as the identity is known, before convergence starts.
    fn record_identity(&self, _id: &ResourceId) {}

    async fn update(&self, id: &ResourceId) -> Result<(), ApiError>;

    async fn delete(&self, id: &ResourceId) -> Result<(), ApiError>;

    /// Current raw state, `None` when the object does not exist.
    async fn describe(&self, id: &ResourceId) -> Result<Option<String>, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Whether an update touches any mutable field, as decided by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Modified,
    /// The update call is skipped entirely; convergence still runs.
    Unchanged,
}

/// Report of one orchestrator invocation.
#[derive(Debug)]
pub struct Reconciliation {
    pub operation: Operation,
    /// Last phase entered.
    pub phase: Phase,
    /// Set as soon as it is known, even if a later phase failed.
    pub identity: Option<ResourceId>,
    /// Success carries the final observed state (`None` after a delete).
    pub outcome: Outcome<Option<String>>,
    /// Invocations of the mutating call.
    pub attempts: Vec<Attempt>,
    /// Invocations of the describe probe.
    pub probes: u32,
    pub elapsed: Duration,
}

impl Reconciliation {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn into_result(self) -> Result<Option<String>, ReconcileError> {
        self.outcome.into_result(self.phase, self.identity)
    }
}

/// Bookkeeping while an invocation is running.
struct Progress {
    operation: Operation,
    phase: Phase,
    identity: Option<ResourceId>,
    attempts: Vec<Attempt>,
    started: Instant,
    deadline: Instant,
}

impl Progress {
    fn start(operation: Operation, identity: Option<ResourceId>, timeout: Duration) -> Self {
        Self {
            operation,
            phase: Phase::Requesting,
            identity,
            attempts: Vec::new(),
            started: Instant::now(),
            deadline: deadline_after(timeout),
        }
    }

    fn finish(self, outcome: Outcome<Option<String>>, probes: u32) -> Reconciliation {
        let elapsed = self.started.elapsed();
        let identity = self
            .identity
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        match &outcome {
            Outcome::Succeeded(state) => info!(
                target: "audit",
                operation = %self.operation,
                identity = %identity,
                state = ?state,
                attempts = self.attempts.len(),
                probes,
                elapsed_ms = elapsed.as_millis() as u64,
                "Reconciliation succeeded"
            ),
            other => warn!(
                target: "audit",
                operation = %self.operation,
                phase = %self.phase,
                identity = %identity,
                outcome = other.label(),
                attempts = self.attempts.len(),
                probes,
                elapsed_ms = elapsed.as_millis() as u64,
                "Reconciliation failed"
            ),
        }
        Reconciliation {
            operation: self.operation,
            phase: self.phase,
            identity: self.identity,
            outcome,
            attempts: self.attempts,
            probes,
            elapsed,
        }
    }
}

/// Drives create/update/delete sequences. Holds only immutable settings, so
/// one instance can serve any number of concurrent invocations.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    backoff: BackoffPolicy,
    classifier: Classifier,
    poll: PollSettings,
}

impl Orchestrator {
    pub fn new(backoff: BackoffPolicy, classifier: Classifier, poll: PollSettings) -> Self {
        Self {
            backoff,
            classifier,
            poll,
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn poll(&self) -> &PollSettings {
        &self.poll
    }

    /// Create, record the identity, then wait for one of `states`' targets.
    pub async fn create<R>(
        &self,
        resource: &R,
        states: &StateSet,
        timeout: Duration,
    ) -> Reconciliation
    where
        R: RemoteResource + ?Sized,
    {
        let mut progress = Progress::start(Operation::Create, None, timeout);
        let token = ClientToken::new();
        info!(token = %token, "Creating resource");

        let token = &token;
        let retried = retry_until(
            move || resource.create(token),
            &self.backoff,
            &self.classifier,
            progress.deadline,
        )
        .await;
        progress.attempts = retried.attempts;
        let created = match retried.outcome.succeeded() {
            Ok(created) => created,
            Err(outcome) => return progress.finish(outcome, 0),
        };

        let id = match resource.identity(&created) {
            Ok(id) => id,
            Err(e) => return progress.finish(Outcome::FailedFast(Failure::Identity(e)), 0),
        };
        resource.record_identity(&id);
        info!(identity = %id, "Create accepted");
        progress.identity = Some(id.clone());

        self.converge(resource, &id, states, progress).await
    }

    /// Update (unless `change` is [`Change::Unchanged`]), then wait for one of
    /// `states`' targets.
    pub async fn update<R>(
        &self,
        resource: &R,
        id: &ResourceId,
        change: Change,
        states: &StateSet,
        timeout: Duration,
    ) -> Reconciliation
    where
        R: RemoteResource + ?Sized,
    {
        let mut progress = Progress::start(Operation::Update, Some(id.clone()), timeout);

        match change {
            Change::Unchanged => {
                info!(identity = %id, "No mutable field changed, skipping update call");
            }
            Change::Modified => {
                info!(identity = %id, "Updating resource");
                let retried = retry_until(
                    move || resource.update(id),
                    &self.backoff,
                    &self.classifier,
                    progress.deadline,
                )
                .await;
                progress.attempts = retried.attempts;
                if let Err(outcome) = retried.outcome.succeeded() {
                    return progress.finish(outcome, 0);
                }
            }
        }

        self.converge(resource, id, states, progress).await
    }

    /// Delete, then wait until the object is gone. `states` normally has an
    /// empty target set (see [`StateSet::absent`]) and may list failure
    /// states such as `"DeleteFailed"`.
    pub async fn delete<R>(
        &self,
        resource: &R,
        id: &ResourceId,
        states: &StateSet,
        timeout: Duration,
    ) -> Reconciliation
    where
        R: RemoteResource + ?Sized,
    {
        let mut progress = Progress::start(Operation::Delete, Some(id.clone()), timeout);
        if !states.awaits_absence() {
            debug!(identity = %id, "Delete waits for a target state instead of absence");
        }
        info!(identity = %id, "Deleting resource");

        let classifier = &self.classifier;
        let retried = retry_until(
            move || async move {
                match resource.delete(id).await {
                    Ok(()) => Ok(true),
                    Err(e) if classifier.is_not_found(&e) => Ok(false),
                    Err(e) => Err(e),
                }
            },
            &self.backoff,
            &self.classifier,
            progress.deadline,
        )
        .await;
        progress.attempts = retried.attempts;
        match retried.outcome.succeeded() {
            Ok(true) => self.converge(resource, id, states, progress).await,
            Ok(false) => {
                info!(identity = %id, "Resource already gone");
                progress.finish(Outcome::Succeeded(None), 0)
            }
            Err(outcome) => progress.finish(outcome, 0),
        }
    }

    async fn converge<R>(
        &self,
        resource: &R,
        id: &ResourceId,
        states: &StateSet,
        mut progress: Progress,
    ) -> Reconciliation
    where
        R: RemoteResource + ?Sized,
    {
        progress.phase = Phase::Converging;
        info!(operation = %progress.operation, identity = %id, "Waiting for convergence");
        let polled = wait_until(
            move || resource.describe(id),
            states,
            &self.poll,
            &self.backoff,
            &self.classifier,
            progress.started,
            progress.deadline,
        )
        .await;
        progress.finish(polled.outcome, polled.probes)
    }
}
