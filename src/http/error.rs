//! Mapping of library errors to JSON error responses.

use crate::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

/// A library error rendered as `{"Error": "..."}`
#[derive(Debug)]
pub struct ApiError(pub Error);

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            Error::BackupNotFound { .. } | Error::DriveFileNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
