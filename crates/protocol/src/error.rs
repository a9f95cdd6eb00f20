use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Machine-readable error codes carried in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    UploadError,
    StorageError,
    InsufficientDiskSpace,
    IoError,
    NotFound,
    IncompleteUpload,
    InternalError,
}

/// Uniform error response body.
///
/// Every error path produces one of these plus a log record sharing the
/// same `trace_id`, so a client-reported failure can be matched to the
/// server log line that explains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub timestamp: DateTime<Utc>,
    /// HTTP status code.
    pub status: u16,
    /// HTTP reason phrase, e.g. `"Bad Request"`.
    pub error: String,
    pub message: String,
    pub path: String,
    pub error_code: ErrorCode,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub trace_id: String,
}

impl ErrorEnvelope {
    pub fn new(
        status: u16,
        error: impl Into<String>,
        message: impl Into<String>,
        path: impl Into<String>,
        error_code: ErrorCode,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            error: error.into(),
            message: message.into(),
            path: path.into(),
            error_code,
            details: serde_json::Map::new(),
            trace_id: trace_id.into(),
        }
    }

    /// Attaches one detail entry, e.g. the offending field or the
    /// missing-chunks list.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ValidationError).unwrap(),
            "\"VALIDATION_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::InsufficientDiskSpace).unwrap(),
            "\"INSUFFICIENT_DISK_SPACE\""
        );
    }

    #[test]
    fn envelope_roundtrip_with_details() {
        let env = ErrorEnvelope::new(
            400,
            "Bad Request",
            "chunkIndex out of range",
            "/upload",
            ErrorCode::ValidationError,
            "trace-1",
        )
        .with_detail("field", serde_json::json!("chunkIndex"))
        .with_detail("rejectedValue", serde_json::json!(9));

        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"errorCode\":\"VALIDATION_ERROR\""));
        assert!(json.contains("\"traceId\":\"trace-1\""));

        let back: ErrorEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn envelope_omits_empty_details() {
        let env = ErrorEnvelope::new(
            404,
            "Not Found",
            "unknown session",
            "/upload/x",
            ErrorCode::NotFound,
            "t",
        );
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("details"));
    }
}
