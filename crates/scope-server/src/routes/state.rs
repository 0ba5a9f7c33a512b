use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StateQuery {
    pub path: Option<String>,
}

/// GET /api/state — the whole tree, or one value with `?path=`.
///
/// Reads see every write, including ones not yet broadcast.
pub async fn get_state(
    State(app): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app.agent.state();
    match query.path {
        Some(path) => {
            let value = state.get(&path).await?;
            Ok(Json(serde_json::json!({
                "path": path,
                "value": value,
                "version": state.version().await,
            })))
        }
        None => Ok(Json(serde_json::to_value(state.get_snapshot().await)?)),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetBody {
    pub path: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub immediate: bool,
}

/// PUT /api/state — write one path.
pub async fn put_state(
    State(app): State<AppState>,
    Json(body): Json<SetBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app.agent.state();
    state.set(&body.path, body.value).await?;
    let published = if body.immediate {
        state.flush().await
    } else {
        None
    };
    Ok(Json(serde_json::json!({
        "ok": true,
        "paths": [body.path],
        "published_version": published,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetManyBody {
    pub updates: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub immediate: bool,
}

/// PATCH /api/state — write several paths at once.
pub async fn patch_state(
    State(app): State<AppState>,
    Json(body): Json<SetManyBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app.agent.state();
    let paths: Vec<String> = body.updates.keys().cloned().collect();
    state.set_many(body.updates).await?;
    let published = if body.immediate {
        state.flush().await
    } else {
        None
    };
    Ok(Json(serde_json::json!({
        "ok": true,
        "paths": paths,
        "published_version": published,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ImmediateQuery {
    #[serde(default)]
    pub immediate: bool,
}

/// DELETE /api/state/{*path} — remove one path and everything under it.
pub async fn delete_state(
    State(app): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ImmediateQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app.agent.state();
    let removed = state.delete(&path).await?;
    let published = if query.immediate {
        state.flush().await
    } else {
        None
    };
    Ok(Json(serde_json::json!({
        "ok": true,
        "path": path,
        "removed": removed,
        "published_version": published,
    })))
}

/// DELETE /api/state — remove every key.
pub async fn clear_state(
    State(app): State<AppState>,
    Query(query): Query<ImmediateQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app.agent.state();
    state.clear().await;
    let published = if query.immediate {
        state.flush().await
    } else {
        None
    };
    Ok(Json(serde_json::json!({
        "ok": true,
        "published_version": published,
    })))
}
