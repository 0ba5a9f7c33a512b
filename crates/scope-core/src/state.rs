//! Buffered, versioned instrument state tree.
//!
//! Writes land in the tree immediately (reads always see the latest value)
//! but are only announced on the next flush. A flush takes every path
//! dirtied since the previous one, bumps `version` by one, and publishes a
//! single `state_update` with just those paths. Several writes to the same
//! path between flushes therefore produce one event carrying the last value.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::broadcast::ConnectionManager;
use crate::error::{CoreError, Result};
use crate::events::Event;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Version of the last published update.
    pub version: u64,
    pub state: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Tree {
    root: Map<String, Value>,
    dirty: BTreeSet<String>,
    version: u64,
}

struct Inner {
    tree: RwLock<Tree>,
    /// Serializes flushes so versions are published in order.
    flush_lock: Mutex<()>,
    connections: ConnectionManager,
    ticker: std::sync::Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct StateProxy {
    inner: Arc<Inner>,
}

fn segments(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

fn lookup<'a>(root: &'a Map<String, Value>, parts: &[&str]) -> Option<&'a Value> {
    let (last, parents) = parts.split_last()?;
    let mut node = root;
    for part in parents {
        node = node.get(*part)?.as_object()?;
    }
    node.get(*last)
}

/// Intermediate segments become objects on demand; a non-object in the way
/// is replaced.
fn insert(root: &mut Map<String, Value>, parts: &[&str], value: Value) {
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut node = root;
    for part in parents {
        let slot = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        node = match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        };
    }
    node.insert(last.to_string(), value);
}

fn remove(root: &mut Map<String, Value>, parts: &[&str]) -> Option<Value> {
    let (last, parents) = parts.split_last()?;
    let mut node = root;
    for part in parents {
        node = node.get_mut(*part)?.as_object_mut()?;
    }
    node.remove(*last)
}

impl StateProxy {
    pub fn new(connections: ConnectionManager) -> Self {
        Self::with_initial(connections, Map::new())
    }

    pub fn with_initial(connections: ConnectionManager, initial: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(Tree {
                    root: initial,
                    ..Default::default()
                }),
                flush_lock: Mutex::new(()),
                connections,
                ticker: std::sync::Mutex::new(None),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn set(&self, path: &str, value: Value) -> Result<()> {
        let parts = segments(path)?;
        let mut tree = self.inner.tree.write().await;
        insert(&mut tree.root, &parts, value);
        tree.dirty.insert(path.to_string());
        trace!(path, "state set");
        Ok(())
    }

    /// Apply every write or none: all paths are checked before any lands.
    pub async fn set_many(&self, updates: BTreeMap<String, Value>) -> Result<()> {
        for path in updates.keys() {
            segments(path)?;
        }
        let mut tree = self.inner.tree.write().await;
        for (path, value) in updates {
            let parts = segments(&path)?;
            insert(&mut tree.root, &parts, value);
            tree.dirty.insert(path);
        }
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        let parts = segments(path)?;
        let mut tree = self.inner.tree.write().await;
        let removed =
            remove(&mut tree.root, &parts).ok_or_else(|| CoreError::KeyNotFound(path.to_string()))?;
        tree.dirty.insert(path.to_string());
        Ok(removed)
    }

    /// Remove every key.
    pub async fn clear(&self) {
        let mut tree = self.inner.tree.write().await;
        let keys: Vec<String> = tree.root.keys().cloned().collect();
        tree.root.clear();
        tree.dirty.extend(keys);
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, path: &str) -> Result<Value> {
        let parts = segments(path)?;
        let tree = self.inner.tree.read().await;
        lookup(&tree.root, &parts)
            .cloned()
            .ok_or_else(|| CoreError::KeyNotFound(path.to_string()))
    }

    pub async fn get_snapshot(&self) -> StateSnapshot {
        let tree = self.inner.tree.read().await;
        StateSnapshot {
            version: tree.version,
            state: Value::Object(tree.root.clone()),
            timestamp: Utc::now(),
        }
    }

    pub async fn version(&self) -> u64 {
        self.inner.tree.read().await.version
    }

    /// Number of paths written since the last flush.
    pub async fn pending(&self) -> usize {
        self.inner.tree.read().await.dirty.len()
    }

    // -----------------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------------

    /// Publish dirtied paths as one `state_update`. Returns the new version,
    /// or `None` when nothing changed since the last flush.
    pub async fn flush(&self) -> Option<u64> {
        let _guard = self.inner.flush_lock.lock().await;

        let (version, event) = {
            let mut tree = self.inner.tree.write().await;
            if tree.dirty.is_empty() {
                return None;
            }
            let dirty = std::mem::take(&mut tree.dirty);
            let mut changes = BTreeMap::new();
            let mut removed = Vec::new();
            for path in dirty {
                let parts: Vec<&str> = path.split('.').collect();
                match lookup(&tree.root, &parts) {
                    Some(value) => {
                        changes.insert(path, value.clone());
                    }
                    None => removed.push(path),
                }
            }
            tree.version += 1;
            let event = Event::StateUpdate {
                version: tree.version,
                changes,
                removed,
                timestamp: Utc::now(),
            };
            (tree.version, event)
        };

        let delivered = self.inner.connections.publish(event).await;
        debug!(version, delivered, "state update published");
        Some(version)
    }

    /// Start flushing every `interval` on a background task. Restarting
    /// replaces the previous ticker.
    pub fn start(&self, interval: Duration) {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.inner.ticker.lock() {
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let proxy = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        proxy.flush().await;
                    }
                }
            }
            debug!("state ticker stopped");
        });
    }

    pub fn stop(&self) {
        if let Ok(mut slot) = self.inner.ticker.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn proxy() -> (StateProxy, crate::broadcast::Subscription) {
        let connections = ConnectionManager::new(64);
        let sub = connections.subscribe().await;
        (StateProxy::new(connections), sub)
    }

    #[tokio::test]
    async fn read_sees_write_before_any_flush() {
        let (state, mut sub) = proxy().await;
        state.set("stage.position", json!([1, 2, 3])).await.unwrap();

        assert_eq!(state.get("stage.position").await.unwrap(), json!([1, 2, 3]));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn writes_within_one_interval_coalesce_into_one_update() {
        let (state, mut sub) = proxy().await;
        state.set("a.b", json!(1)).await.unwrap();
        state.set("a.b", json!(2)).await.unwrap();
        state.set("a.c", json!("x")).await.unwrap();

        assert_eq!(state.flush().await, Some(1));
        let Some(Event::StateUpdate {
            version, changes, ..
        }) = sub.recv().await
        else {
            panic!("expected state_update");
        };
        assert_eq!(version, 1);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["a.b"], json!(2));
        assert_eq!(changes["a.c"], json!("x"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn flush_without_changes_publishes_nothing() {
        let (state, mut sub) = proxy().await;
        assert_eq!(state.flush().await, None);
        assert_eq!(state.version().await, 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn versions_increase_by_one_per_flush() {
        let (state, mut sub) = proxy().await;
        let mut seen = Vec::new();
        for i in 0..4 {
            state.set("counter", json!(i)).await.unwrap();
            state.flush().await;
            if let Some(Event::StateUpdate { version, .. }) = sub.recv().await {
                seen.push(version);
            }
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn nested_write_keeps_siblings() {
        let (state, _sub) = proxy().await;
        state.set("a.b.d", json!("keep")).await.unwrap();
        state.set("a.b.c", json!(5)).await.unwrap();

        assert_eq!(state.get("a.b.d").await.unwrap(), json!("keep"));
        assert_eq!(state.get("a.b").await.unwrap(), json!({"c": 5, "d": "keep"}));
    }

    #[tokio::test]
    async fn write_through_scalar_replaces_it_with_a_container() {
        let (state, _sub) = proxy().await;
        state.set("a", json!(1)).await.unwrap();
        state.set("a.b", json!(2)).await.unwrap();
        assert_eq!(state.get("a").await.unwrap(), json!({"b": 2}));
    }

    #[tokio::test]
    async fn delete_then_get_is_key_not_found_and_sibling_survives() {
        let (state, mut sub) = proxy().await;
        state.set("stage.x", json!(1)).await.unwrap();
        state.set("stage.y", json!(2)).await.unwrap();
        state.flush().await;
        sub.recv().await;

        state.delete("stage.x").await.unwrap();
        assert!(matches!(
            state.get("stage.x").await.unwrap_err(),
            CoreError::KeyNotFound(_)
        ));
        assert_eq!(state.get("stage.y").await.unwrap(), json!(2));

        state.flush().await;
        let Some(Event::StateUpdate {
            changes, removed, ..
        }) = sub.recv().await
        else {
            panic!("expected state_update");
        };
        assert!(changes.is_empty());
        assert_eq!(removed, vec!["stage.x".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_key_fails() {
        let (state, _sub) = proxy().await;
        assert!(matches!(
            state.delete("nope").await.unwrap_err(),
            CoreError::KeyNotFound(_)
        ));
        assert_eq!(state.pending().await, 0);
    }

    #[tokio::test]
    async fn empty_segments_are_rejected() {
        let (state, _sub) = proxy().await;
        for bad in ["", "a..b", ".a", "a."] {
            assert!(matches!(
                state.set(bad, json!(1)).await.unwrap_err(),
                CoreError::InvalidPath(_)
            ));
        }
    }

    #[tokio::test]
    async fn set_many_is_all_or_nothing() {
        let (state, _sub) = proxy().await;
        let updates = BTreeMap::from([
            ("ok".to_string(), json!(1)),
            ("bad..path".to_string(), json!(2)),
        ]);
        assert!(state.set_many(updates).await.is_err());
        assert!(state.get("ok").await.is_err());
        assert_eq!(state.pending().await, 0);
    }

    #[tokio::test]
    async fn clear_reports_every_top_level_key_removed() {
        let (state, mut sub) = proxy().await;
        state.set("a", json!(1)).await.unwrap();
        state.set("b.c", json!(2)).await.unwrap();
        state.flush().await;
        sub.recv().await;

        state.clear().await;
        state.flush().await;
        let Some(Event::StateUpdate { removed, .. }) = sub.recv().await else {
            panic!("expected state_update");
        };
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(state.get_snapshot().await.state, json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_flushes_on_interval() {
        let (state, mut sub) = proxy().await;
        state.start(Duration::from_millis(100));
        state.set("stage.position", json!([1, 2, 3])).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("tick should publish")
            .unwrap();
        let Event::StateUpdate { version, changes, .. } = event else {
            panic!("expected state_update");
        };
        assert_eq!(version, 1);
        assert_eq!(changes["stage.position"], json!([1, 2, 3]));

        state.stop();
        assert!(!state.is_ticking());
    }
}
