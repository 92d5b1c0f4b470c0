//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tapline_core::{IdentityError, RelayError};
use thiserror::Error;

use crate::metrics;

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A required field is missing or has the wrong type.
    #[error("{0}")]
    MissingField(&'static str),

    /// The request body could not be read.
    #[error("{0}")]
    BadRequest(String),

    /// The relay rejected a tap.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Pairing or identity lookup failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Relay(RelayError::NotPaired(_)) => StatusCode::CONFLICT,
            ApiError::Relay(_) => StatusCode::BAD_REQUEST,
            ApiError::Identity(e) => match e {
                IdentityError::InvalidInviteCode => StatusCode::NOT_FOUND,
                IdentityError::AlreadyPaired(_)
                | IdentityError::DuplicatePair(_)
                | IdentityError::NotPaired(_) => StatusCode::CONFLICT,
                IdentityError::Invalid(_)
                | IdentityError::UnknownParticipant(_)
                | IdentityError::SelfPair(_) => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error("http");
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapline_core::ParticipantId;

    #[test]
    fn test_status_mapping() {
        let me = ParticipantId::parse("me").unwrap();

        assert_eq!(
            ApiError::MissingField("Body expoPushToken is required").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RelayError::InvalidCoordinates { x: 1.5, y: 0.0 }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RelayError::NotPaired(me.clone())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(IdentityError::InvalidInviteCode).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(IdentityError::AlreadyPaired(me)).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_error_response() {
        let response = ApiError::MissingField("Body must contain numeric x and y").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
