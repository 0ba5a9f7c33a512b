//! `scope-core` — action execution and shared state for instrument control.
//!
//! # Architecture
//!
//! ```text
//! ActionRegistry  ← name -> ActionDefinition (params, tags, callable)
//!     │
//!     ▼
//! Agent           ← validates, records PENDING, routes to an Actor
//!     │
//!     ▼
//! Actor           ← one per action; drives the callable on its own task
//!     │              ASSIGNED -> RUNNING -> DONE | ERROR | CANCELLED
//!     ▼
//! Reporter        ← AssignationStore first, then ConnectionManager
//!
//! StateProxy      ← dot-path tree, dirty set flushed once per tick
//!                   as a versioned state_update
//! ```

pub mod actor;
pub mod agent;
pub mod assignation;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod registry;
pub mod reporter;
pub mod state;
pub mod store;
pub mod yields;

pub use agent::Agent;
pub use assignation::{Assignation, AssignationStatus, LogLevel};
pub use config::ScopeConfig;
pub use context::ActionContext;
pub use error::{ActionError, CoreError, Result, Violation};
pub use events::Event;
pub use registry::{ActionDefinition, ActionRegistry, Callable, ParamSpec, ParamType};
pub use state::StateProxy;
pub use store::ListFilter;
pub use yields::{YieldStream, Yielder};
