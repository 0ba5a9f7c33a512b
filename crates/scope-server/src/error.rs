use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scope_core::error::CoreError;

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 400 Bad Request errors
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 400 through the `anyhow::Error` chain for input
/// problems the core never sees (malformed query parameters and the like).
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::UnknownAction(_)
        | CoreError::AssignationNotFound(_)
        | CoreError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::DuplicateAction(_)
        | CoreError::InvalidTransition { .. }
        | CoreError::AssignationActive(..) => StatusCode::CONFLICT,
        CoreError::SchemaValidation { .. } | CoreError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        CoreError::Config(_) | CoreError::Io(_) | CoreError::Yaml(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(b) = self.0.downcast_ref::<BadRequestError>() {
            let body = serde_json::json!({ "error": b.0.clone() });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }

        let (status, body) = match self.0.downcast_ref::<CoreError>() {
            Some(e) => {
                let mut body = serde_json::json!({ "error": e.to_string() });
                if let CoreError::SchemaValidation { violations, .. } = e {
                    body["violations"] = serde_json::json!(violations);
                }
                (status_for(e), body)
            }
            None => {
                tracing::error!(error = %self.0, "unhandled request error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": self.0.to_string() }),
                )
            }
        };
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
