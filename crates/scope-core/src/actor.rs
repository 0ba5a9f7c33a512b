//! Execution wrapper bound to a single action.
//!
//! Each submitted assignation runs on its own task. The actor moves it
//! through ASSIGNED and RUNNING, drives the callable, and records exactly one
//! terminal outcome. A callable that fails or panics ends in ERROR without
//! touching any other in-flight assignation.
//!
//! Once RUNNING, the callable is always polled to completion. Cancelling only
//! fires its token; the callable sees it at its next context suspension point
//! and returns [`ActionError::Cancelled`] after running its own cleanup.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assignation::AssignationStatus;
use crate::context::ActionContext;
use crate::error::ActionError;
use crate::registry::{ActionDefinition, Callable};
use crate::reporter::Reporter;
use crate::state::StateProxy;

/// How a callable finished.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Done(Value),
    Failed(String),
    Cancelled,
}

impl From<ActionError> for Outcome {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::Failed(msg) => Outcome::Failed(msg),
            ActionError::Cancelled => Outcome::Cancelled,
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("action panicked: {detail}")
}

#[derive(Clone)]
pub struct Actor {
    definition: Arc<ActionDefinition>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    inflight: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    reporter: Reporter,
    state: StateProxy,
}

impl Actor {
    /// `default_concurrency` applies when the definition does not set its own
    /// limit.
    pub fn new(
        definition: Arc<ActionDefinition>,
        default_concurrency: usize,
        reporter: Reporter,
        state: StateProxy,
    ) -> Self {
        let concurrency = definition.concurrency.unwrap_or(default_concurrency).max(1);
        Self {
            definition,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            reporter,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<ActionDefinition> {
        &self.definition
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Assignations accepted and not yet terminal.
    pub async fn inflight(&self) -> usize {
        self.inflight.lock().await.len()
    }

    /// Take ownership of `id` ahead of [`Actor::submit`], so a cancel that
    /// arrives before dispatch is recorded and honoured on submit.
    pub async fn reserve(&self, id: Uuid) {
        self.inflight
            .lock()
            .await
            .entry(id)
            .or_insert_with(CancellationToken::new);
    }

    /// Start executing a PENDING assignation. Returns as soon as the
    /// execution task is spawned; the handle resolves to the terminal status,
    /// or `None` if the lifecycle was rejected along the way.
    pub async fn submit(&self, id: Uuid, args: Map<String, Value>) -> JoinHandle<Option<AssignationStatus>> {
        let token = self
            .inflight
            .lock()
            .await
            .entry(id)
            .or_insert_with(CancellationToken::new)
            .clone();

        let actor = self.clone();
        tokio::spawn(async move {
            let status = actor.execute(id, args, token).await;
            actor.inflight.lock().await.remove(&id);
            status
        })
    }

    /// Request cooperative cancellation. `false` when this actor does not own
    /// a live assignation with that id.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.inflight.lock().await.get(&id) {
            Some(token) => {
                token.cancel();
                debug!(assignation = %id, action = self.name(), "cancel requested");
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) -> usize {
        let inflight = self.inflight.lock().await;
        for token in inflight.values() {
            token.cancel();
        }
        inflight.len()
    }

    async fn execute(
        &self,
        id: Uuid,
        args: Map<String, Value>,
        token: CancellationToken,
    ) -> Option<AssignationStatus> {
        if token.is_cancelled() {
            return self.finish(id, Outcome::Cancelled).await;
        }
        self.reporter.assigned(id).await.ok()?;

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return self.finish(id, Outcome::Cancelled).await,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return self.finish(id, Outcome::Cancelled).await,
            },
        };

        self.reporter.running(id).await.ok()?;
        info!(assignation = %id, action = self.name(), "assignation running");

        let ctx = ActionContext::new(
            id,
            self.name(),
            self.state.clone(),
            token.clone(),
            self.reporter.clone(),
        );
        let outcome = match &self.definition.callable {
            Callable::SingleShot(callable) => {
                match AssertUnwindSafe(callable.call(args, ctx)).catch_unwind().await {
                    Ok(Ok(value)) => Outcome::Done(value),
                    Ok(Err(e)) => e.into(),
                    Err(payload) => Outcome::Failed(panic_message(payload)),
                }
            }
            Callable::Streaming(callable) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| callable.open(args, ctx))) {
                    Ok(stream) => self.drain(id, stream).await?,
                    Err(payload) => Outcome::Failed(panic_message(payload)),
                }
            }
        };

        self.finish(id, outcome).await
    }

    /// Pull the stream until it ends or fails. Each item is recorded and
    /// broadcast before the next one is requested. A cancelled producer ends
    /// the stream with [`ActionError::Cancelled`].
    async fn drain(
        &self,
        id: Uuid,
        mut stream: futures::stream::BoxStream<'static, Result<Value, ActionError>>,
    ) -> Option<Outcome> {
        loop {
            match AssertUnwindSafe(stream.next()).catch_unwind().await {
                Ok(None) => return Some(Outcome::Done(Value::Null)),
                Ok(Some(Ok(value))) => {
                    self.reporter.yielded(id, value).await.ok()?;
                }
                Ok(Some(Err(e))) => return Some(e.into()),
                Err(payload) => return Some(Outcome::Failed(panic_message(payload))),
            }
        }
    }

    async fn finish(&self, id: Uuid, outcome: Outcome) -> Option<AssignationStatus> {
        let snapshot = match outcome {
            Outcome::Done(value) => self.reporter.done(id, value).await,
            Outcome::Failed(msg) => {
                warn!(assignation = %id, action = self.name(), error = %msg, "assignation failed");
                self.reporter.failed(id, msg).await
            }
            Outcome::Cancelled => self.reporter.cancelled(id).await,
        }
        .ok()?;
        info!(
            assignation = %id,
            action = self.name(),
            status = %snapshot.status,
            "assignation finished"
        );
        Some(snapshot.status)
    }
}
