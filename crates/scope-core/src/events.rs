use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::assignation::{Assignation, LogLevel};

/// Everything a subscriber can observe.
///
/// Assignation events carry the assignation id and action name so a
/// subscriber can correlate without a lookup; `state_update` carries the
/// changed paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AssignationCreated {
        assignation: Assignation,
        timestamp: DateTime<Utc>,
    },
    AssignationAssigned {
        assignation_id: Uuid,
        action: String,
        timestamp: DateTime<Utc>,
    },
    AssignationProgress {
        assignation_id: Uuid,
        action: String,
        progress: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    AssignationLog {
        assignation_id: Uuid,
        action: String,
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
    AssignationYield {
        assignation_id: Uuid,
        action: String,
        /// Zero-based position in the yield sequence.
        index: usize,
        value: Value,
        timestamp: DateTime<Utc>,
    },
    AssignationDone {
        assignation_id: Uuid,
        action: String,
        result: Value,
        timestamp: DateTime<Utc>,
    },
    AssignationError {
        assignation_id: Uuid,
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    AssignationCancelled {
        assignation_id: Uuid,
        action: String,
        timestamp: DateTime<Utc>,
    },
    StateUpdate {
        version: u64,
        /// Dirtied paths that still resolve, with their current values.
        changes: BTreeMap<String, Value>,
        /// Dirtied paths that no longer resolve.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Wire name, identical to the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::AssignationCreated { .. } => "assignation_created",
            Event::AssignationAssigned { .. } => "assignation_assigned",
            Event::AssignationProgress { .. } => "assignation_progress",
            Event::AssignationLog { .. } => "assignation_log",
            Event::AssignationYield { .. } => "assignation_yield",
            Event::AssignationDone { .. } => "assignation_done",
            Event::AssignationError { .. } => "assignation_error",
            Event::AssignationCancelled { .. } => "assignation_cancelled",
            Event::StateUpdate { .. } => "state_update",
        }
    }

    pub fn assignation_id(&self) -> Option<Uuid> {
        match self {
            Event::AssignationCreated { assignation, .. } => Some(assignation.id),
            Event::AssignationAssigned { assignation_id, .. }
            | Event::AssignationProgress { assignation_id, .. }
            | Event::AssignationLog { assignation_id, .. }
            | Event::AssignationYield { assignation_id, .. }
            | Event::AssignationDone { assignation_id, .. }
            | Event::AssignationError { assignation_id, .. }
            | Event::AssignationCancelled { assignation_id, .. } => Some(*assignation_id),
            Event::StateUpdate { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::AssignationDone { .. }
                | Event::AssignationError { .. }
                | Event::AssignationCancelled { .. }
        )
    }
}
