use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::assignation::AssignationStatus;

/// One violated constraint found while validating assignation arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// `args` was not a JSON object.
    NotAnObject,
    MissingRequired {
        param: String,
    },
    WrongType {
        param: String,
        expected: String,
        found: String,
    },
    UnexpectedArgument {
        param: String,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::NotAnObject => write!(f, "arguments must be a JSON object"),
            Violation::MissingRequired { param } => write!(f, "missing required argument '{param}'"),
            Violation::WrongType {
                param,
                expected,
                found,
            } => write!(f, "argument '{param}' must be {expected}, got {found}"),
            Violation::UnexpectedArgument { param } => write!(f, "unexpected argument '{param}'"),
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("action already registered: {0}")]
    DuplicateAction(String),

    #[error("invalid arguments for '{action}': {}", join_violations(.violations))]
    SchemaValidation {
        action: String,
        violations: Vec<Violation>,
    },

    #[error("assignation not found: {0}")]
    AssignationNotFound(Uuid),

    #[error("assignation {0} is still {1}")]
    AssignationActive(Uuid, AssignationStatus),

    #[error("state key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid state path '{0}': segments must be non-empty")]
    InvalidPath(String),

    #[error("invalid transition for assignation {id} from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: AssignationStatus,
        to: AssignationStatus,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure raised by an action callable.
///
/// `Cancelled` must be returned when the callable unwinds because its
/// cancellation token fired, so the assignation ends CANCELLED rather than
/// ERROR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
