use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] JsonRejection),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        };

        (status, Json(json!({ "status": "error", "message": self.to_string() }))).into_response()
    }
}
