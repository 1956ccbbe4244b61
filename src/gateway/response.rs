use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::moderation::{ModerationOutcome, ModerationResult};

/// Body for array input. Single input is answered with the bare result.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<ModerationResult>,
}

impl IntoResponse for ModerationOutcome {
    fn into_response(self) -> Response {
        match self {
            ModerationOutcome::Single(result) => (StatusCode::OK, Json(result)).into_response(),
            ModerationOutcome::Batch(results) => (StatusCode::OK, Json(BatchResponse { results })).into_response(),
        }
    }
}
