//! Error-to-HTTP response conversion.

use crate::error::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wrapper so handlers can return `Result<T, AppError>` and use `?` on
/// crate errors.
#[derive(Debug)]
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "request failed");
        }

        let mut body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        if let Error::Transcode {
            stderr: Some(stderr),
            ..
        } = &self.0
        {
            body["detail"] = json!(stderr);
        }

        (status, Json(body)).into_response()
    }
}
