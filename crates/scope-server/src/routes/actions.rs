use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;
use scope_core::registry::ActionInfo;

#[derive(Debug, Default, Deserialize)]
pub struct ActionsQuery {
    pub tag: Option<String>,
}

/// GET /api/actions — every registered action, optionally only those
/// carrying `?tag=`.
pub async fn list_actions(
    State(app): State<AppState>,
    Query(query): Query<ActionsQuery>,
) -> Json<Vec<ActionInfo>> {
    let registry = app.agent.registry();
    let definitions = match query.tag.as_deref() {
        Some(tag) => registry.by_tag(tag),
        None => registry.list(),
    };
    Json(definitions.iter().map(|d| d.info()).collect())
}

/// GET /api/actions/{name} — one action's schema.
pub async fn get_action(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ActionInfo>, AppError> {
    let definition = app.agent.registry().resolve(&name)?;
    Ok(Json(definition.info()))
}
