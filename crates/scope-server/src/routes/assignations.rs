use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use scope_core::{Assignation, AssignationStatus, ListFilter};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub action: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub reference: Option<String>,
    /// Cancel automatically once this many milliseconds have elapsed.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// POST /api/assignations — validate and dispatch; answers with the PENDING
/// snapshot without waiting for execution.
pub async fn submit_assignation(
    State(app): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<Assignation>), AppError> {
    let snapshot = match body.timeout_ms {
        Some(ms) => {
            app.agent
                .assign_with_deadline(
                    &body.action,
                    body.args,
                    body.reference,
                    Duration::from_millis(ms),
                )
                .await?
        }
        None => {
            app.agent
                .assign(&body.action, body.args, body.reference)
                .await?
        }
    };
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub action: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/assignations — creation order, filterable by `status`, `action`
/// and `limit`.
pub async fn list_assignations(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Assignation>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<AssignationStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let filter = ListFilter {
        status,
        action: query.action,
        limit: query.limit,
    };
    Ok(Json(app.agent.list(&filter).await))
}

/// GET /api/assignations/{id} — full snapshot including yields and logs.
pub async fn get_assignation(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Assignation>, AppError> {
    Ok(Json(app.agent.get(id).await?))
}

/// POST /api/assignations/{id}/cancel — request cancellation. The
/// `assignation_cancelled` event confirms it.
pub async fn cancel_assignation(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Assignation>), AppError> {
    let snapshot = app.agent.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// DELETE /api/assignations/{id} — drop a finished record.
pub async fn evict_assignation(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Assignation>, AppError> {
    Ok(Json(app.agent.evict(id).await?))
}
