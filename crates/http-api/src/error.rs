//! Error translation: receiver errors to the uniform HTTP envelope.
//!
//! Every error response carries a fresh trace id that also appears in
//! exactly one server log record, so client reports can be matched to
//! logs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use chunkferry_protocol::{ErrorCode, ErrorEnvelope};
use chunkferry_receiver::ReceiveError;

/// An error bound to the request path it occurred on.
#[derive(Debug)]
pub struct ApiError {
    kind: ApiErrorKind,
    path: String,
}

#[derive(Debug)]
enum ApiErrorKind {
    Receive(ReceiveError),
    /// The concurrent-upload ceiling was hit; clients should retry.
    Busy,
}

impl ApiError {
    pub fn from_receive(error: ReceiveError, path: &str) -> Self {
        Self {
            kind: ApiErrorKind::Receive(error),
            path: path.to_string(),
        }
    }

    pub fn busy(path: &str) -> Self {
        Self {
            kind: ApiErrorKind::Busy,
            path: path.to_string(),
        }
    }

    pub fn not_found(session_id: &str, path: &str) -> Self {
        Self::from_receive(ReceiveError::NotFound(session_id.to_string()), path)
    }

    fn envelope(&self) -> (StatusCode, ErrorEnvelope) {
        let trace_id = uuid::Uuid::new_v4().to_string();

        let (status, code, message) = match &self.kind {
            ApiErrorKind::Busy => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorCode::UploadError,
                "too many concurrent uploads, retry later".to_string(),
            ),
            ApiErrorKind::Receive(e) => {
                let status = match e {
                    ReceiveError::Validation(_) | ReceiveError::IncompleteUpload { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    ReceiveError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let code = match e {
                    ReceiveError::Validation(_) => ErrorCode::ValidationError,
                    ReceiveError::NotFound(_) => ErrorCode::NotFound,
                    ReceiveError::IncompleteUpload { .. } => ErrorCode::IncompleteUpload,
                    ReceiveError::Storage { .. } => ErrorCode::StorageError,
                    ReceiveError::InsufficientDiskSpace { .. } => {
                        ErrorCode::InsufficientDiskSpace
                    }
                    ReceiveError::Assembly { .. } => ErrorCode::UploadError,
                    ReceiveError::Io(_) => ErrorCode::IoError,
                };
                (status, code, e.to_string())
            }
        };

        let mut envelope = ErrorEnvelope::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error"),
            message,
            &self.path,
            code,
            &trace_id,
        );

        if let ApiErrorKind::Receive(e) = &self.kind {
            match e {
                ReceiveError::Validation(errors) => {
                    let fields: serde_json::Map<String, serde_json::Value> = errors
                        .fields()
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                        .collect();
                    envelope = envelope
                        .with_detail("fieldErrors", serde_json::Value::Object(fields));
                }
                ReceiveError::IncompleteUpload { session, missing } => {
                    envelope = envelope
                        .with_detail("sessionId", serde_json::json!(session))
                        .with_detail("missingChunks", serde_json::json!(missing));
                }
                ReceiveError::InsufficientDiskSpace {
                    required,
                    available,
                } => {
                    envelope = envelope
                        .with_detail("requiredBytes", serde_json::json!(required))
                        .with_detail("availableBytes", serde_json::json!(available));
                }
                ReceiveError::Storage { session, operation, .. } => {
                    envelope = envelope
                        .with_detail("sessionId", serde_json::json!(session))
                        .with_detail("operation", serde_json::json!(operation));
                }
                ReceiveError::Assembly { session, .. } => {
                    envelope = envelope.with_detail("sessionId", serde_json::json!(session));
                }
                _ => {}
            }
        }

        (status, envelope)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, envelope) = self.envelope();

        if status.is_server_error() {
            tracing::error!(
                trace_id = %envelope.trace_id,
                path = %envelope.path,
                status = status.as_u16(),
                "{}",
                envelope.message
            );
        } else {
            tracing::warn!(
                trace_id = %envelope.trace_id,
                path = %envelope.path,
                status = status.as_u16(),
                "{}",
                envelope.message
            );
        }

        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkferry_receiver::error::ValidationErrors;

    #[test]
    fn validation_maps_to_400_with_field_details() {
        let mut errors = ValidationErrors::new();
        errors.push("chunkIndex", "must be less than totalChunks");
        let err = ApiError::from_receive(ReceiveError::Validation(errors), "/upload");

        let (status, envelope) = err.envelope();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope.error_code, ErrorCode::ValidationError);
        assert_eq!(envelope.path, "/upload");
        assert!(envelope.details.contains_key("fieldErrors"));
        assert!(!envelope.trace_id.is_empty());
    }

    #[test]
    fn incomplete_maps_to_400_with_missing_list() {
        let err = ApiError::from_receive(
            ReceiveError::IncompleteUpload {
                session: "s".into(),
                missing: vec![1, 3],
            },
            "/upload/s/complete",
        );
        let (status, envelope) = err.envelope();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope.error_code, ErrorCode::IncompleteUpload);
        assert_eq!(envelope.details["missingChunks"], serde_json::json!([1, 3]));
    }

    #[test]
    fn disk_space_maps_to_500_with_byte_counts() {
        let err = ApiError::from_receive(
            ReceiveError::InsufficientDiskSpace {
                required: 1000,
                available: 10,
            },
            "/upload/s/complete",
        );
        let (status, envelope) = err.envelope();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(envelope.error_code, ErrorCode::InsufficientDiskSpace);
        assert_eq!(envelope.details["requiredBytes"], serde_json::json!(1000));
        assert_eq!(envelope.details["availableBytes"], serde_json::json!(10));
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::not_found("ghost", "/upload/ghost");
        let (status, envelope) = err.envelope();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(envelope.error_code, ErrorCode::NotFound);
    }

    #[test]
    fn busy_maps_to_retryable_429() {
        let (status, envelope) = ApiError::busy("/upload").envelope();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(envelope.error_code, ErrorCode::UploadError);
    }
}
