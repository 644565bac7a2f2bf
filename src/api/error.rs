use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use snafu::Snafu;

use crate::database::DatabaseError;
use crate::identity::IdentityError;
use crate::model::SlugError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("invalid slug format"))]
    InvalidSlug { source: SlugError },

    #[snafu(display("invalid request ip"))]
    InvalidOrigin { source: IdentityError },

    #[snafu(display("{}", if source.is_timeout() { "request timed out" } else { "internal server error" }))]
    Storage { source: DatabaseError },
}

/// Body of every error response, `{"error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidSlug { .. } | ApiError::InvalidOrigin { .. } => StatusCode::BAD_REQUEST,
            ApiError::Storage { source } if source.is_timeout() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            ApiError::Storage { source } => tracing::error!(error = %source, "stats storage failed"),
            other => {
                let reason = std::error::Error::source(other).map(ToString::to_string);
                tracing::debug!(error = %other, ?reason, "rejected request");
            }
        }

        error_response(status, self.to_string())
    }
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: message.into(),
    };

    (status, Json(body)).into_response()
}
