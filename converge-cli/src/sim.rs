//! In-process simulated control plane.
//!
//! Models a search index addressed by `instance:table:index` on an
//! eventually consistent API: mutating calls may be throttled, accepted
//! changes take a configurable number of describe calls to settle, and a
//! provisioning run can end in a terminal failure state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use converge_engine::{ApiError, ClientToken, IdentityError, RemoteResource, ResourceId};
use tracing::{debug, info};

const THROTTLED: &str = "Throttling.User";
const NOT_EXIST: &str = "OTSObjectNotExist";
const ALREADY_EXIST: &str = "OTSObjectAlreadyExist";

/// Behaviour knobs, set from the command line.
#[derive(Debug, Clone)]
pub struct Knobs {
    /// Throttling responses returned before a mutating call is accepted.
    pub throttles: u32,
    /// Describe calls that still report the transitional state.
    pub settle_polls: u32,
    /// State reported once settled instead of the normal end state.
    pub fail_state: Option<String>,
    /// Simulated round-trip time of every call.
    pub latency: Duration,
    /// Whether the index exists before the command runs.
    pub exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Creating,
    Updating,
    Deleting,
    Running,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Creating => "Creating",
            Status::Updating => "Updating",
            Status::Deleting => "Deleting",
            Status::Running => "Running",
        }
    }
}

#[derive(Debug)]
struct State {
    throttles_left: u32,
    status: Option<Status>,
    settle_left: u32,
    /// Token of the create call that produced the current index.
    created_by: Option<ClientToken>,
    recorded: Option<ResourceId>,
}

/// Response of the simulated create call.
#[derive(Debug, Clone)]
pub struct CreatedIndex {
    pub instance: String,
    pub table: String,
    pub index: String,
}

pub struct SimulatedIndex {
    instance: String,
    table: String,
    index: String,
    knobs: Knobs,
    state: Mutex<State>,
    requests: AtomicU64,
}

impl SimulatedIndex {
    pub fn new(instance: String, table: String, index: String, knobs: Knobs) -> Self {
        let status = knobs.exists.then_some(Status::Running);
        Self {
            instance,
            table,
            index,
            state: Mutex::new(State {
                throttles_left: knobs.throttles,
                status,
                settle_left: 0,
                created_by: None,
                recorded: None,
            }),
            knobs,
            requests: AtomicU64::new(0),
        }
    }

    /// Identity recorded by the last create, if any.
    pub fn recorded(&self) -> Option<ResourceId> {
        self.lock().recorded.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn error(&self, code: &str, message: &str) -> ApiError {
        let n = self.requests.load(Ordering::Relaxed);
        ApiError::service(code, message).with_request_id(format!("sim-{n:06}"))
    }

    /// Simulate the round trip and apply throttling.
    async fn request(&self, call: &'static str) -> Result<(), ApiError> {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.knobs.latency).await;
        let mut state = self.lock();
        if state.throttles_left > 0 {
            state.throttles_left -= 1;
            debug!(call, request = n, left = state.throttles_left, "Throttling request");
            return Err(self.error(THROTTLED, "Request was denied due to user flow control."));
        }
        Ok(())
    }

    fn begin(&self, state: &mut State, status: Status) {
        state.status = Some(status);
        state.settle_left = self.knobs.settle_polls;
    }
}

#[async_trait]
impl RemoteResource for SimulatedIndex {
    type Created = CreatedIndex;

    async fn create(&self, token: &ClientToken) -> Result<CreatedIndex, ApiError> {
        self.request("create").await?;
        let mut state = self.lock();
        match (state.status, state.created_by) {
            (None, _) => {
                self.begin(&mut state, Status::Creating);
                state.created_by = Some(*token);
                info!(token = %token, index = %self.index, "Create accepted");
            }
            // a retry of a call that already went through
            (Some(_), Some(previous)) if previous == *token => {
                debug!(token = %token, "Duplicate create deduplicated by client token");
            }
            (Some(_), _) => {
                return Err(self.error(ALREADY_EXIST, "Requested index already exists."));
            }
        }
        Ok(CreatedIndex {
            instance: self.instance.clone(),
            table: self.table.clone(),
            index: self.index.clone(),
        })
    }

    fn identity(&self, created: &CreatedIndex) -> Result<ResourceId, IdentityError> {
        ResourceId::new([&created.instance, &created.table, &created.index])
    }

    fn record_identity(&self, id: &ResourceId) {
        self.lock().recorded = Some(id.clone());
    }

    async fn update(&self, _id: &ResourceId) -> Result<(), ApiError> {
        self.request("update").await?;
        let mut state = self.lock();
        if state.status.is_none() {
            return Err(self.error(NOT_EXIST, "Requested index does not exist."));
        }
        self.begin(&mut state, Status::Updating);
        info!(index = %self.index, "Update accepted");
        Ok(())
    }

    async fn delete(&self, _id: &ResourceId) -> Result<(), ApiError> {
        self.request("delete").await?;
        let mut state = self.lock();
        if state.status.is_none() {
            return Err(self.error(NOT_EXIST, "Requested index does not exist."));
        }
        self.begin(&mut state, Status::Deleting);
        info!(index = %self.index, "Delete accepted");
        Ok(())
    }

    async fn describe(&self, _id: &ResourceId) -> Result<Option<String>, ApiError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.knobs.latency).await;
        let mut state = self.lock();
        let Some(status) = state.status else {
            return Err(self.error(NOT_EXIST, "Requested index does not exist."));
        };
        if status == Status::Running {
            return Ok(Some(status.as_str().to_string()));
        }
        if state.settle_left > 0 {
            state.settle_left -= 1;
            return Ok(Some(status.as_str().to_string()));
        }
        if let Some(fail) = &self.knobs.fail_state {
            return Ok(Some(fail.clone()));
        }
        match status {
            Status::Deleting => {
                state.status = None;
                Err(self.error(NOT_EXIST, "Requested index does not exist."))
            }
            _ => {
                state.status = Some(Status::Running);
                Ok(Some(Status::Running.as_str().to_string()))
            }
        }
    }
}
