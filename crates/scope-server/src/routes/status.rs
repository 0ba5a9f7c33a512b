use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::state::AppState;

/// GET /api/status — liveness plus a summary of the agent.
pub async fn get_status(State(app): State<AppState>) -> Json<serde_json::Value> {
    let agent = &app.agent;
    let assignations: BTreeMap<String, usize> = agent
        .store()
        .count_by_status()
        .await
        .into_iter()
        .map(|(status, n)| (status.to_string(), n))
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "actions": agent.registry().len(),
        "subscribers": agent.connections().subscriber_count().await,
        "state_version": agent.state().version().await,
        "assignations": assignations,
        "uptime_seconds": (Utc::now() - app.started_at).num_seconds(),
    }))
}
