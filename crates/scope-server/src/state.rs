use chrono::{DateTime, Utc};
use scope_core::Agent;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub agent: Agent,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            started_at: Utc::now(),
        }
    }
}
