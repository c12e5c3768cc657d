use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::features::{FeatureError, FieldIssue, IssueKind};
use crate::stage::PipelineError;
use crate::stats::StatsError;

/// Everything a handler can fail with, and the status it maps to.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<FieldIssue>),
    /// Body is not parseable JSON.
    #[error("{0}")]
    BadRequest(String),
    /// Well-formed JSON of the wrong shape.
    #[error("{0}")]
    Unprocessable(String),
    #[error("{1}")]
    Rejected(StatusCode, String),
    #[error("Username already registered")]
    DuplicateUser,
    #[error("Incorrect username or password")]
    InvalidCredentials,
    #[error("{0}")]
    Unavailable(String),
    #[error("Stats not found")]
    StatsNotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation(issues) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "detail": issues }),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "detail": msg })),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "detail": msg }))
            }
            ApiError::Rejected(status, msg) => (*status, json!({ "detail": msg })),
            ApiError::DuplicateUser | ApiError::InvalidCredentials => {
                (StatusCode::BAD_REQUEST, json!({ "detail": self.to_string() }))
            }
            ApiError::Unavailable(reason) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "detail": reason }))
            }
            ApiError::StatsNotFound => (StatusCode::NOT_FOUND, json!({ "error": "Stats not found" })),
            ApiError::Internal(msg) => {
                error!("request failed: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<FeatureError> for ApiError {
    fn from(e: FeatureError) -> Self {
        match e {
            FeatureError::Invalid(issues) => ApiError::Validation(issues),
            other => ApiError::Unprocessable(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        match r {
            JsonRejection::JsonDataError(e) => ApiError::Unprocessable(e.body_text()),
            JsonRejection::JsonSyntaxError(e) => ApiError::BadRequest(e.body_text()),
            other => ApiError::Rejected(other.status(), other.body_text()),
        }
    }
}

/// `Json` extractor whose rejections go through [`ApiError`], so a bad body
/// still gets a JSON `detail` reply.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Unavailable(_) => {
                ApiError::Unavailable("Model not loaded".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Blank(field) => ApiError::Validation(vec![FieldIssue {
                field: field.to_string(),
                reason: IssueKind::Blank,
            }]),
            AuthError::Duplicate => ApiError::DuplicateUser,
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StatsError> for ApiError {
    fn from(e: StatsError) -> Self {
        match e {
            StatsError::NotFound => ApiError::StatsNotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (ApiError::Validation(vec![]), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::BadRequest("eof".into()), StatusCode::BAD_REQUEST),
            (ApiError::Unprocessable("shape".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ApiError::Rejected(StatusCode::UNSUPPORTED_MEDIA_TYPE, "ct".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (ApiError::DuplicateUser, StatusCode::BAD_REQUEST),
            (ApiError::InvalidCredentials, StatusCode::BAD_REQUEST),
            (ApiError::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::StatsNotFound, StatusCode::NOT_FOUND),
            (ApiError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn pipeline_unavailable_maps_to_503() {
        let e: ApiError = PipelineError::Unavailable("no file".into()).into();
        assert!(matches!(e, ApiError::Unavailable(_)));
    }

    #[test]
    fn non_object_record_is_unprocessable() {
        let e: ApiError = FeatureError::NotAnObject.into();
        assert!(matches!(e, ApiError::Unprocessable(_)));
        assert_eq!(e.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
