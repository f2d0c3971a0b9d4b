use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde_json::json;
use tracing::error;

use crate::error::DropError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0.downcast_ref::<DropError>() {
            Some(err) => (err.status(), err.to_string()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };

        if status.is_server_error() {
            error!(error = ?self.0, "request failed");
        }

        (status, Json(json!({ "error": message }))).into_response()
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
