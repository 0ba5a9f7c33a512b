//! Front door of the core: validates requests, owns one actor per action,
//! and routes cancellation to whichever actor runs an assignation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::assignation::{Assignation, AssignationStatus};
use crate::broadcast::{ConnectionManager, Subscription};
use crate::config::ScopeConfig;
use crate::error::{CoreError, Result};
use crate::registry::ActionRegistry;
use crate::reporter::Reporter;
use crate::state::StateProxy;
use crate::store::{AssignationStore, ListFilter};

struct Inner {
    registry: ActionRegistry,
    actors: HashMap<String, Actor>,
    /// Live assignation id -> name of the actor running it.
    bindings: Arc<Mutex<HashMap<Uuid, String>>>,
    reporter: Reporter,
    state: StateProxy,
    config: ScopeConfig,
}

/// Cloneable handle; clones share every actor, the store and the state tree.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    /// Build one actor per registered action. The registry is fixed from here
    /// on.
    pub fn new(registry: ActionRegistry, config: ScopeConfig) -> Self {
        let connections = ConnectionManager::new(config.broadcast.subscriber_buffer);
        let store = AssignationStore::new();
        let reporter = Reporter::new(store, connections.clone());
        let state = StateProxy::new(connections);

        let actors = registry
            .list()
            .into_iter()
            .map(|definition| {
                let name = definition.name.clone();
                let actor = Actor::new(
                    definition,
                    config.actors.default_concurrency,
                    reporter.clone(),
                    state.clone(),
                );
                (name, actor)
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                registry,
                actors,
                bindings: Arc::new(Mutex::new(HashMap::new())),
                reporter,
                state,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.inner.registry
    }

    pub fn state(&self) -> &StateProxy {
        &self.inner.state
    }

    pub fn store(&self) -> &AssignationStore {
        self.inner.reporter.store()
    }

    pub fn connections(&self) -> &ConnectionManager {
        self.inner.reporter.connections()
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.inner.config
    }

    /// Start the periodic state broadcast.
    pub fn start(&self) {
        let interval = self.inner.config.state.tick_interval();
        self.inner.state.start(interval);
        info!(
            actions = self.inner.registry.len(),
            tick_ms = interval.as_millis() as u64,
            "agent started"
        );
    }

    /// Cancel everything in flight, stop the ticker, and publish any
    /// outstanding state writes.
    pub async fn shutdown(&self) {
        let mut cancelled = 0;
        for actor in self.inner.actors.values() {
            cancelled += actor.cancel_all().await;
        }
        self.inner.state.stop();
        self.inner.state.flush().await;
        info!(cancelled, "agent shut down");
    }

    pub async fn subscribe(&self) -> Subscription {
        self.connections().subscribe().await
    }

    // -----------------------------------------------------------------------
    // Assignations
    // -----------------------------------------------------------------------

    /// Validate, record and dispatch. Returns the PENDING snapshot without
    /// waiting for execution.
    pub async fn assign(
        &self,
        action: &str,
        args: Value,
        reference: Option<String>,
    ) -> Result<Assignation> {
        self.dispatch(action, args, reference, None).await
    }

    /// [`Agent::assign`], cancelled automatically once `deadline` elapses.
    pub async fn assign_with_deadline(
        &self,
        action: &str,
        args: Value,
        reference: Option<String>,
        deadline: Duration,
    ) -> Result<Assignation> {
        self.dispatch(action, args, reference, Some(deadline)).await
    }

    async fn dispatch(
        &self,
        action: &str,
        args: Value,
        reference: Option<String>,
        deadline: Option<Duration>,
    ) -> Result<Assignation> {
        let definition = self.inner.registry.resolve(action)?;
        let args = definition.validate(&args)?;
        let actor = self
            .inner
            .actors
            .get(action)
            .ok_or_else(|| CoreError::UnknownAction(action.to_string()))?;

        let assignation = Assignation::new(action, args.clone(), reference);
        let id = assignation.id;

        // Owner and token exist before anyone can learn the id, so a cancel
        // sent in reaction to `assignation_created` always finds them.
        actor.reserve(id).await;
        self.inner
            .bindings
            .lock()
            .await
            .insert(id, action.to_string());
        self.inner.reporter.created(assignation.clone()).await;

        let mut handle = actor.submit(id, args).await;
        let actor = actor.clone();
        let bindings = self.inner.bindings.clone();
        tokio::spawn(async move {
            let finished = match deadline {
                None => handle.await,
                Some(deadline) => tokio::select! {
                    finished = &mut handle => finished,
                    _ = tokio::time::sleep(deadline) => {
                        if actor.cancel(id).await {
                            info!(assignation = %id, ?deadline, "deadline elapsed, cancelling");
                        }
                        handle.await
                    }
                },
            };
            if let Err(e) = finished {
                warn!(assignation = %id, error = %e, "actor task aborted");
            }
            bindings.lock().await.remove(&id);
        });

        debug!(assignation = %id, action, "assignation dispatched");
        Ok(assignation)
    }

    /// Ask the owning actor to cancel. The CANCELLED transition follows
    /// asynchronously; the returned snapshot is the state at request time.
    pub async fn cancel(&self, id: Uuid) -> Result<Assignation> {
        let snapshot = self.store().get(id).await?;
        if snapshot.is_terminal() {
            return Err(CoreError::InvalidTransition {
                id,
                from: snapshot.status,
                to: AssignationStatus::Cancelled,
            });
        }

        let owner = self.inner.bindings.lock().await.get(&id).cloned();
        let accepted = match owner.as_deref().and_then(|name| self.inner.actors.get(name)) {
            Some(actor) => actor.cancel(id).await,
            None => false,
        };
        if !accepted {
            // The owner let go of the id, so it has already finished.
            let current = self.store().get(id).await?;
            return Err(CoreError::InvalidTransition {
                id,
                from: current.status,
                to: AssignationStatus::Cancelled,
            });
        }
        self.store().get(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Assignation> {
        self.store().get(id).await
    }

    /// Without a `limit` the configured `store.max_list` applies.
    pub async fn list(&self, filter: &ListFilter) -> Vec<Assignation> {
        let mut filter = filter.clone();
        filter.limit.get_or_insert(self.inner.config.store.max_list);
        self.store().list(&filter).await
    }

    pub async fn evict(&self, id: Uuid) -> Result<Assignation> {
        self.store().evict(id).await
    }

    pub async fn inflight(&self) -> usize {
        self.inner.bindings.lock().await.len()
    }
}
