//! Static catalogue of actions.
//!
//! Every action is declared explicitly at startup: a name, a typed parameter
//! list, capability tags, and a callable that is either single-shot or
//! streaming. Nothing is inferred from the callable itself.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::ActionContext;
use crate::error::{ActionError, CoreError, Result, Violation};

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Any,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ParamType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Bool => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamType::Any => "any",
            ParamType::Bool => "bool",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamType, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Callables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallableKind {
    SingleShot,
    Streaming,
}

/// An action that runs once and returns one value.
#[async_trait]
pub trait SingleShotAction: Send + Sync {
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: ActionContext,
    ) -> std::result::Result<Value, ActionError>;
}

/// An action that produces a finite, single-consumption sequence of partial
/// values. An `Err` item ends the sequence.
pub trait StreamingAction: Send + Sync {
    fn open(
        &self,
        args: Map<String, Value>,
        ctx: ActionContext,
    ) -> BoxStream<'static, std::result::Result<Value, ActionError>>;
}

struct FnSingleShot<F>(F);

#[async_trait]
impl<F, Fut> SingleShotAction for FnSingleShot<F>
where
    F: Fn(Map<String, Value>, ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
{
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: ActionContext,
    ) -> std::result::Result<Value, ActionError> {
        (self.0)(args, ctx).await
    }
}

struct FnStreaming<F>(F);

impl<F, S> StreamingAction for FnStreaming<F>
where
    F: Fn(Map<String, Value>, ActionContext) -> S + Send + Sync,
    S: Stream<Item = std::result::Result<Value, ActionError>> + Send + 'static,
{
    fn open(
        &self,
        args: Map<String, Value>,
        ctx: ActionContext,
    ) -> BoxStream<'static, std::result::Result<Value, ActionError>> {
        (self.0)(args, ctx).boxed()
    }
}

/// Closed set of callable shapes an action can take.
#[derive(Clone)]
pub enum Callable {
    SingleShot(Arc<dyn SingleShotAction>),
    Streaming(Arc<dyn StreamingAction>),
}

impl Callable {
    /// Wrap an async closure as a single-shot callable.
    pub fn single_shot<F, Fut>(f: F) -> Self
    where
        F: Fn(Map<String, Value>, ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
    {
        Callable::SingleShot(Arc::new(FnSingleShot(f)))
    }

    /// Wrap a closure returning a stream as a streaming callable.
    pub fn streaming<F, S>(f: F) -> Self
    where
        F: Fn(Map<String, Value>, ActionContext) -> S + Send + Sync + 'static,
        S: Stream<Item = std::result::Result<Value, ActionError>> + Send + 'static,
    {
        Callable::Streaming(Arc::new(FnStreaming(f)))
    }

    pub fn kind(&self) -> CallableKind {
        match self {
            Callable::SingleShot(_) => CallableKind::SingleShot,
            Callable::Streaming(_) => CallableKind::Streaming,
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callable::{:?}", self.kind())
    }
}

// ---------------------------------------------------------------------------
// ActionDefinition
// ---------------------------------------------------------------------------

/// Immutable description of an action plus the callable that runs it.
#[derive(Debug, Clone)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub tags: BTreeSet<String>,
    /// Maximum number of assignations this action runs at once. `None` uses
    /// the configured actor default.
    pub concurrency: Option<usize>,
    pub callable: Callable,
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>, callable: Callable) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            tags: BTreeSet::new(),
            concurrency: None,
            callable,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    pub fn kind(&self) -> CallableKind {
        self.callable.kind()
    }

    /// Check `args` against the declared parameters, collecting every
    /// violation. On success returns the arguments with declared defaults
    /// filled in.
    pub fn validate(&self, args: &Value) -> Result<Map<String, Value>> {
        let mut violations = Vec::new();
        let empty = Map::new();
        let supplied = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(CoreError::SchemaValidation {
                    action: self.name.clone(),
                    violations: vec![Violation::NotAnObject],
                })
            }
        };

        let mut normalized = Map::new();
        for spec in &self.params {
            match supplied.get(&spec.name) {
                Some(value) if !spec.kind.accepts(value) => {
                    violations.push(Violation::WrongType {
                        param: spec.name.clone(),
                        expected: spec.kind.name().to_string(),
                        found: json_type_name(value).to_string(),
                    });
                }
                Some(value) => {
                    normalized.insert(spec.name.clone(), value.clone());
                }
                None if spec.required => {
                    violations.push(Violation::MissingRequired {
                        param: spec.name.clone(),
                    });
                }
                None => {
                    if let Some(default) = &spec.default {
                        normalized.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }

        for key in supplied.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                violations.push(Violation::UnexpectedArgument { param: key.clone() });
            }
        }

        if violations.is_empty() {
            Ok(normalized)
        } else {
            Err(CoreError::SchemaValidation {
                action: self.name.clone(),
                violations,
            })
        }
    }

    pub fn info(&self) -> ActionInfo {
        ActionInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind(),
            params: self.params.clone(),
            tags: self.tags.iter().cloned().collect(),
        }
    }
}

/// Serializable view of an [`ActionDefinition`] without its callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub name: String,
    pub description: String,
    pub kind: CallableKind,
    pub params: Vec<ParamSpec>,
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct ActionRegistry {
    definitions: HashMap<String, Arc<ActionDefinition>>,
    order: Vec<String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ActionDefinition) -> Result<()> {
        if self.definitions.contains_key(&definition.name) {
            return Err(CoreError::DuplicateAction(definition.name));
        }
        debug!(action = %definition.name, kind = ?definition.kind(), "registered action");
        self.order.push(definition.name.clone());
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ActionDefinition>> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownAction(name.to_string()))
    }

    pub fn validate_args(&self, name: &str, args: &Value) -> Result<Map<String, Value>> {
        self.resolve(name)?.validate(args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All definitions in registration order.
    pub fn list(&self) -> Vec<Arc<ActionDefinition>> {
        self.order
            .iter()
            .filter_map(|name| self.definitions.get(name).cloned())
            .collect()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Arc<ActionDefinition>> {
        self.list()
            .into_iter()
            .filter(|d| d.tags.contains(tag))
            .collect()
    }
}
