//! HTTP error surface.
//!
//! Every error response carries the same JSON shape the status endpoint
//! uses for failures: `{"success": false, "error": <status>, "message":
//! <text>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use junction_common::GatewayError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    /// Missing or unrecognized `Api-Token` header.
    Unauthorized,
    Gateway(GatewayError),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Gateway(GatewayError::Validation(_)) => StatusCode::BAD_REQUEST,
            AppError::Gateway(GatewayError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Unauthorized => "valid Api-Token header required".to_string(),
            AppError::Gateway(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "success": false,
            "error": status.as_u16(),
            "message": self.message(),
        });
        (status, Json(body)).into_response()
    }
}
