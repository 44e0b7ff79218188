use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::errors::NightshiftError;

impl IntoResponse for NightshiftError {
    fn into_response(self) -> axum::response::Response {
        let classification = self.classify();
        let status = match &self {
            NightshiftError::Validation(_)
            | NightshiftError::Graph(_)
            | NightshiftError::Schedule(_)
            | NightshiftError::Json(_)
            | NightshiftError::Yaml(_)
            | NightshiftError::Config(_) => StatusCode::BAD_REQUEST,
            NightshiftError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({"error": self.to_string(), "errorType": classification.error_type}))).into_response()
    }
}
