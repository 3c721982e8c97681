use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use teamserver_core::TeamserverError;
use tracing::error;

/// A [`TeamserverError`] rendered as an HTTP response.
///
/// Body: `{"error": <kind>, "message": <text>}`.
#[derive(Debug)]
pub struct ApiError(pub TeamserverError);

impl From<TeamserverError> for ApiError {
    fn from(err: TeamserverError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TeamserverError::Validation(format!(
            "invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(TeamserverError::Validation(format!(
            "invalid path: {}",
            rejection.body_text()
        )))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(TeamserverError::Validation(format!(
            "invalid query string: {}",
            rejection.body_text()
        )))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            TeamserverError::NotFound { .. } => StatusCode::NOT_FOUND,
            TeamserverError::AlreadyExists { .. } | TeamserverError::InvalidState(_) => {
                StatusCode::CONFLICT
            }
            TeamserverError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
