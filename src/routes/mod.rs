mod api;

pub use api::*;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{ErrorKind, WorkflowError};

impl ErrorKind {
    fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::StateTransition => StatusCode::CONFLICT,
            ErrorKind::Resource => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Dispatch => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind == ErrorKind::Persistence {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "kind": format!("{kind:?}"),
        }));
        (kind.status(), body).into_response()
    }
}
