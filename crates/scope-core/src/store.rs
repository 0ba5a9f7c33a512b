//! Authoritative in-memory record of every assignation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::assignation::{Assignation, AssignationStatus};
use crate::error::{CoreError, Result};

/// Filter for [`AssignationStore::list`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub status: Option<AssignationStatus>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Default)]
struct Records {
    by_id: HashMap<Uuid, Assignation>,
    /// Creation order.
    order: Vec<Uuid>,
}

/// Cloneable handle; all clones share the same records.
#[derive(Clone, Default)]
pub struct AssignationStore {
    records: Arc<RwLock<Records>>,
}

impl AssignationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, assignation: Assignation) {
        let mut records = self.records.write().await;
        records.order.push(assignation.id);
        records.by_id.insert(assignation.id, assignation);
    }

    pub async fn get(&self, id: Uuid) -> Result<Assignation> {
        self.records
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or(CoreError::AssignationNotFound(id))
    }

    /// Snapshots in creation order, filtered. `limit` keeps the most recent.
    pub async fn list(&self, filter: &ListFilter) -> Vec<Assignation> {
        let records = self.records.read().await;
        let mut matching: Vec<Assignation> = records
            .order
            .iter()
            .filter_map(|id| records.by_id.get(id))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.action.as_deref().map_or(true, |n| a.action == n))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            if matching.len() > limit {
                matching.drain(..matching.len() - limit);
            }
        }
        matching
    }

    /// Apply `f` to the record under the write lock and return whatever it
    /// projects out. A failing `f` must leave the record untouched.
    ///
    /// Callers that only need a field or two should project just those;
    /// cloning the whole record copies every yield and log line.
    pub async fn update<F, R>(&self, id: Uuid, f: F) -> Result<R>
    where
        F: FnOnce(&mut Assignation) -> Result<R>,
    {
        let mut records = self.records.write().await;
        let record = records
            .by_id
            .get_mut(&id)
            .ok_or(CoreError::AssignationNotFound(id))?;
        f(record)
    }

    /// Remove a terminal record. Used by retention policies; live
    /// assignations cannot be evicted.
    pub async fn evict(&self, id: Uuid) -> Result<Assignation> {
        let mut records = self.records.write().await;
        let status = records
            .by_id
            .get(&id)
            .map(|a| a.status)
            .ok_or(CoreError::AssignationNotFound(id))?;
        if !status.is_terminal() {
            return Err(CoreError::AssignationActive(id, status));
        }
        records.order.retain(|r| *r != id);
        records
            .by_id
            .remove(&id)
            .ok_or(CoreError::AssignationNotFound(id))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn count_by_status(&self) -> HashMap<AssignationStatus, usize> {
        let records = self.records.read().await;
        let mut counts = HashMap::new();
        for a in records.by_id.values() {
            *counts.entry(a.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn new(action: &str) -> Assignation {
        Assignation::new(action, Map::new(), None)
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = AssignationStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::AssignationNotFound(_)));
    }

    #[tokio::test]
    async fn list_is_creation_ordered_and_filterable() {
        let store = AssignationStore::new();
        let a = new("capture_image");
        let b = new("move_stage");
        let c = new("capture_image");
        for x in [&a, &b, &c] {
            store.insert(x.clone()).await;
        }
        store
            .update(b.id, |r| r.transition(AssignationStatus::Assigned))
            .await
            .unwrap();

        let all: Vec<_> = store
            .list(&ListFilter::default())
            .await
            .into_iter()
            .map(|x| x.id)
            .collect();
        assert_eq!(all, vec![a.id, b.id, c.id]);

        let pending = store
            .list(&ListFilter {
                status: Some(AssignationStatus::Pending),
                ..Default::default()
            })
            .await;
        assert_eq!(pending.len(), 2);

        let captures = store
            .list(&ListFilter {
                action: Some("capture_image".into()),
                limit: Some(1),
                ..Default::default()
            })
            .await;
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].id, c.id);
    }

    #[tokio::test]
    async fn failed_update_leaves_record_untouched() {
        let store = AssignationStore::new();
        let a = new("capture_image");
        store.insert(a.clone()).await;

        let err = store
            .update(a.id, |r| r.complete(json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(store.get(a.id).await.unwrap(), a);
    }

    #[tokio::test]
    async fn update_returns_only_what_the_closure_projects() {
        let store = AssignationStore::new();
        let mut a = new("time_lapse");
        a.transition(AssignationStatus::Assigned).unwrap();
        a.transition(AssignationStatus::Running).unwrap();
        store.insert(a.clone()).await;

        for frame in 0..3 {
            let index = store
                .update(a.id, |r| {
                    r.push_yield(json!(frame))?;
                    Ok(r.yields.len() - 1)
                })
                .await
                .unwrap();
            assert_eq!(index, frame);
        }
        assert_eq!(store.get(a.id).await.unwrap().yields.len(), 3);
    }

    #[tokio::test]
    async fn only_terminal_records_can_be_evicted() {
        let store = AssignationStore::new();
        let a = new("capture_image");
        store.insert(a.clone()).await;
        assert!(store.evict(a.id).await.is_err());

        store
            .update(a.id, |r| r.transition(AssignationStatus::Cancelled))
            .await
            .unwrap();
        store.evict(a.id).await.unwrap();
        assert!(store.is_empty().await);
        assert!(store.get(a.id).await.is_err());
    }
}
