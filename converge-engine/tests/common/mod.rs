//! Shared test utilities for converge-engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use converge_engine::{
    ApiError, BackoffPolicy, Classifier, ClientToken, IdentityError, Orchestrator, PollSettings,
    RemoteResource, ResourceId,
};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Replays scripted responses in order; the last one repeats forever.
pub struct Script<T: Clone> {
    steps: Mutex<VecDeque<T>>,
    calls: AtomicU32,
}

impl<T: Clone> Script<T> {
    pub fn new(steps: Vec<T>) -> Self {
        assert!(!steps.is_empty(), "script needs at least one step");
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn next(&self) -> T {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps.front().cloned().unwrap()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A search index addressed by `instance:table:index`, driven by scripts.
pub struct FakeIndex {
    pub components: Vec<String>,
    pub create: Script<Result<(), ApiError>>,
    pub update: Script<Result<(), ApiError>>,
    pub delete: Script<Result<(), ApiError>>,
    pub describe: Script<Result<Option<String>, ApiError>>,
    pub tokens: Mutex<Vec<ClientToken>>,
    pub recorded: Mutex<Option<ResourceId>>,
}

impl FakeIndex {
    pub fn new() -> Self {
        Self {
            components: vec!["inst".into(), "tbl".into(), "idx".into()],
            create: Script::new(vec![Ok(())]),
            update: Script::new(vec![Ok(())]),
            delete: Script::new(vec![Ok(())]),
            describe: Script::new(vec![Ok(Some("Running".into()))]),
            tokens: Mutex::new(Vec::new()),
            recorded: Mutex::new(None),
        }
    }

    pub fn named(mut self, components: &[&str]) -> Self {
        self.components = components.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn creates(mut self, steps: Vec<Result<(), ApiError>>) -> Self {
        self.create = Script::new(steps);
        self
    }

    pub fn updates(mut self, steps: Vec<Result<(), ApiError>>) -> Self {
        self.update = Script::new(steps);
        self
    }

    pub fn deletes(mut self, steps: Vec<Result<(), ApiError>>) -> Self {
        self.delete = Script::new(steps);
        self
    }

    pub fn describes(mut self, steps: Vec<Result<Option<String>, ApiError>>) -> Self {
        self.describe = Script::new(steps);
        self
    }

    /// Describe script that reports each state in turn.
    pub fn states(self, states: &[&str]) -> Self {
        self.describes(states.iter().map(|s| Ok(Some(s.to_string()))).collect())
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.components.clone()).unwrap()
    }
}

#[async_trait]
impl RemoteResource for FakeIndex {
    type Created = Vec<String>;

    async fn create(&self, token: &ClientToken) -> Result<Self::Created, ApiError> {
        self.tokens.lock().unwrap().push(*token);
        self.create.next().map(|()| self.components.clone())
    }

    fn identity(&self, created: &Self::Created) -> Result<ResourceId, IdentityError> {
        ResourceId::new(created.clone())
    }

    fn record_identity(&self, id: &ResourceId) {
        *self.recorded.lock().unwrap() = Some(id.clone());
    }

    async fn update(&self, _id: &ResourceId) -> Result<(), ApiError> {
        self.update.next()
    }

    async fn delete(&self, _id: &ResourceId) -> Result<(), ApiError> {
        self.delete.next()
    }

    async fn describe(&self, id: &ResourceId) -> Result<Option<String>, ApiError> {
        let created = !self.tokens.lock().unwrap().is_empty();
        let recorded = self.recorded.lock().unwrap().clone();
        // after a create, the identity must be recorded before the first probe
        if created && recorded.as_ref() != Some(id) {
            return Err(ApiError::Other(format!("describe for unrecorded identity {}", id)));
        }
        self.describe.next()
    }
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Orchestrator with a constant backoff and no jitter, so elapsed time on a
/// paused clock is predictable.
pub fn orchestrator(backoff_ms: u64, poll_ms: u64) -> Orchestrator {
    Orchestrator::new(
        BackoffPolicy::constant(ms(backoff_ms)).unwrap(),
        Classifier::default(),
        PollSettings::new(ms(poll_ms)).unwrap(),
    )
}

pub fn throttled() -> ApiError {
    ApiError::service("Throttling.User", "Request was denied due to user flow control.")
}

pub fn not_found() -> ApiError {
    ApiError::service("OTSObjectNotExist", "Requested table does not exist.")
}

/// Collects every event emitted on the current thread as
/// `"<message> field=value ..."`.
#[derive(Clone, Default)]
pub struct LogCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    /// Install as the thread's default subscriber until the guard drops.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));
        (capture, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn matching(&self, message: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.starts_with(message))
            .collect()
    }
}

#[derive(Default)]
struct Line {
    message: String,
    fields: Vec<String>,
}

impl Visit for Line {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = Line::default();
        event.record(&mut line);
        let mut text = line.message;
        for field in line.fields {
            text.push(' ');
            text.push_str(&field);
        }
        self.lines.lock().unwrap().push(text);
    }
}
