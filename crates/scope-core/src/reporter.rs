//! Records lifecycle changes in the store, then broadcasts them.
//!
//! The store is always updated before the matching event is published, so a
//! subscriber that reacts to an event by fetching the assignation never sees
//! an older snapshot than the event describes.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::assignation::{Assignation, AssignationStatus, LogLevel};
use crate::broadcast::ConnectionManager;
use crate::error::Result;
use crate::events::Event;
use crate::store::AssignationStore;

#[derive(Clone)]
pub struct Reporter {
    store: AssignationStore,
    connections: ConnectionManager,
}

impl Reporter {
    pub fn new(store: AssignationStore, connections: ConnectionManager) -> Self {
        Self { store, connections }
    }

    pub fn store(&self) -> &AssignationStore {
        &self.store
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    async fn publish(&self, event: Event) {
        let kind = event.kind();
        let delivered = self.connections.publish(event).await;
        debug!(event = kind, delivered, "event published");
    }

    fn rejected(id: Uuid, what: &str, err: &crate::error::CoreError) {
        error!(assignation = %id, what, error = %err, "lifecycle update rejected");
    }

    pub async fn created(&self, assignation: Assignation) {
        self.store.insert(assignation.clone()).await;
        self.publish(Event::AssignationCreated {
            assignation,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn assigned(&self, id: Uuid) -> Result<()> {
        let action = self
            .store
            .update(id, |a| {
                a.transition(AssignationStatus::Assigned)?;
                Ok(a.action.clone())
            })
            .await
            .inspect_err(|e| Self::rejected(id, "assigned", e))?;
        self.publish(Event::AssignationAssigned {
            assignation_id: id,
            action,
            timestamp: Utc::now(),
        })
        .await;
        Ok(())
    }

    /// ASSIGNED to RUNNING. Not broadcast.
    pub async fn running(&self, id: Uuid) -> Result<()> {
        self.store
            .update(id, |a| a.transition(AssignationStatus::Running))
            .await
            .inspect_err(|e| Self::rejected(id, "running", e))
    }

    pub async fn progress(&self, id: Uuid, percent: u8, message: Option<String>) {
        let percent = percent.min(100);
        let msg = message.clone();
        match self
            .store
            .update(id, move |a| {
                a.set_progress(percent, msg)?;
                Ok(a.action.clone())
            })
            .await
        {
            Ok(action) => {
                self.publish(Event::AssignationProgress {
                    assignation_id: id,
                    action,
                    progress: percent,
                    message,
                    timestamp: Utc::now(),
                })
                .await
            }
            Err(e) => warn!(assignation = %id, error = %e, "progress dropped"),
        }
    }

    pub async fn log(&self, id: Uuid, level: LogLevel, message: String) {
        let msg = message.clone();
        let logged = self
            .store
            .update(id, move |a| {
                a.push_log(level, msg)?;
                Ok(a.action.clone())
            })
            .await;
        match logged {
            Ok(action) => {
                self.publish(Event::AssignationLog {
                    assignation_id: id,
                    action,
                    level,
                    message,
                    timestamp: Utc::now(),
                })
                .await
            }
            Err(e) => warn!(assignation = %id, error = %e, "log dropped"),
        }
    }

    /// Append one streamed value. Returns its zero-based index.
    pub async fn yielded(&self, id: Uuid, value: Value) -> Result<usize> {
        let item = value.clone();
        let (action, index) = self
            .store
            .update(id, move |a| {
                a.push_yield(item)?;
                Ok((a.action.clone(), a.yields.len() - 1))
            })
            .await
            .inspect_err(|e| Self::rejected(id, "yield", e))?;
        self.publish(Event::AssignationYield {
            assignation_id: id,
            action,
            index,
            value,
            timestamp: Utc::now(),
        })
        .await;
        Ok(index)
    }

    pub async fn done(&self, id: Uuid, result: Value) -> Result<Assignation> {
        let value = result.clone();
        let snapshot = self
            .store
            .update(id, move |a| {
                a.complete(value)?;
                Ok(a.clone())
            })
            .await
            .inspect_err(|e| Self::rejected(id, "done", e))?;
        self.publish(Event::AssignationDone {
            assignation_id: id,
            action: snapshot.action.clone(),
            result,
            timestamp: Utc::now(),
        })
        .await;
        Ok(snapshot)
    }

    pub async fn failed(&self, id: Uuid, message: String) -> Result<Assignation> {
        let msg = message.clone();
        let snapshot = self
            .store
            .update(id, move |a| {
                a.fail(msg)?;
                Ok(a.clone())
            })
            .await
            .inspect_err(|e| Self::rejected(id, "error", e))?;
        self.publish(Event::AssignationError {
            assignation_id: id,
            action: snapshot.action.clone(),
            error: message,
            timestamp: Utc::now(),
        })
        .await;
        Ok(snapshot)
    }

    pub async fn cancelled(&self, id: Uuid) -> Result<Assignation> {
        let snapshot = self
            .store
            .update(id, |a| {
                a.transition(AssignationStatus::Cancelled)?;
                Ok(a.clone())
            })
            .await
            .inspect_err(|e| Self::rejected(id, "cancelled", e))?;
        self.publish(Event::AssignationCancelled {
            assignation_id: id,
            action: snapshot.action.clone(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use serde_json::{json, Map};

    async fn setup() -> (Reporter, crate::broadcast::Subscription, Uuid) {
        let connections = ConnectionManager::new(32);
        let sub = connections.subscribe().await;
        let reporter = Reporter::new(AssignationStore::new(), connections);
        let a = Assignation::new("capture_image", Map::new(), None);
        let id = a.id;
        reporter.created(a).await;
        (reporter, sub, id)
    }

    #[tokio::test]
    async fn store_is_updated_before_event_is_seen() {
        let (reporter, mut sub, id) = setup().await;
        assert_eq!(sub.recv().await.unwrap().kind(), "assignation_created");

        reporter.assigned(id).await.unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind(), "assignation_assigned");
        assert_eq!(
            reporter.store().get(id).await.unwrap().status,
            AssignationStatus::Assigned
        );
    }

    #[tokio::test]
    async fn running_is_not_broadcast() {
        let (reporter, mut sub, id) = setup().await;
        sub.recv().await;
        reporter.assigned(id).await.unwrap();
        sub.recv().await;
        reporter.running(id).await.unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn yields_carry_their_index() {
        let (reporter, mut sub, id) = setup().await;
        reporter.assigned(id).await.unwrap();
        reporter.running(id).await.unwrap();
        assert_eq!(reporter.yielded(id, json!("a")).await.unwrap(), 0);
        assert_eq!(reporter.yielded(id, json!("b")).await.unwrap(), 1);

        let indices: Vec<usize> = std::iter::from_fn(|| sub.try_recv())
            .filter_map(|e| match e {
                Event::AssignationYield { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn second_outcome_is_rejected_and_not_broadcast() {
        let (reporter, mut sub, id) = setup().await;
        reporter.assigned(id).await.unwrap();
        reporter.running(id).await.unwrap();
        reporter.done(id, json!(1)).await.unwrap();
        while sub.try_recv().is_some() {}

        let err = reporter.cancelled(id).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn progress_outside_running_is_dropped() {
        let (reporter, mut sub, id) = setup().await;
        sub.recv().await;
        reporter.progress(id, 50, None).await;
        assert!(sub.try_recv().is_none());
        assert_eq!(reporter.store().get(id).await.unwrap().progress, None);
    }
}
