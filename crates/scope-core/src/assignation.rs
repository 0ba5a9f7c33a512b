//! Assignation record and its lifecycle state machine.
//!
//! ```text
//! PENDING ─▶ ASSIGNED ─▶ RUNNING ─▶ DONE | ERROR | CANCELLED
//!    │           │
//!    └───────────┴──────▶ CANCELLED
//! ```
//!
//! Terminal states accept no further transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// AssignationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignationStatus {
    Pending,
    Assigned,
    Running,
    Done,
    Error,
    Cancelled,
}

impl AssignationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: AssignationStatus) -> bool {
        use AssignationStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, Running)
                | (Assigned, Cancelled)
                | (Running, Done)
                | (Running, Error)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for AssignationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssignationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "ASSIGNED" => Ok(Self::Assigned),
            "RUNNING" => Ok(Self::Running),
            "DONE" => Ok(Self::Done),
            "ERROR" => Ok(Self::Error),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown assignation status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Assignation
// ---------------------------------------------------------------------------

/// One invocation of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignation {
    pub id: Uuid,
    pub action: String,
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub status: AssignationStatus,
    #[serde(default)]
    pub yields: Vec<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignation {
    pub fn new(action: impl Into<String>, args: Map<String, Value>, reference: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            args,
            reference,
            status: AssignationStatus::Pending,
            yields: Vec::new(),
            result: None,
            error: None,
            progress: None,
            progress_message: None,
            logs: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, stamping timestamps. Fails without mutating when the
    /// state machine forbids the move.
    pub fn transition(&mut self, next: AssignationStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match next {
            AssignationStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    pub fn complete(&mut self, result: Value) -> Result<()> {
        self.transition(AssignationStatus::Done)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(AssignationStatus::Error)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Progress, yields and logs are only accepted while RUNNING; they never
    /// change the status.
    fn require_running(&self, attempted: AssignationStatus) -> Result<()> {
        if self.status != AssignationStatus::Running {
            return Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: attempted,
            });
        }
        Ok(())
    }

    pub fn push_yield(&mut self, value: Value) -> Result<()> {
        self.require_running(AssignationStatus::Running)?;
        self.yields.push(value);
        Ok(())
    }

    pub fn set_progress(&mut self, progress: u8, message: Option<String>) -> Result<()> {
        self.require_running(AssignationStatus::Running)?;
        self.progress = Some(progress.min(100));
        self.progress_message = message;
        Ok(())
    }

    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        self.require_running(AssignationStatus::Running)?;
        self.logs.push(LogEntry {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
