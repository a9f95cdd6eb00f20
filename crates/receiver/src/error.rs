//! Receiver error taxonomy.

use std::collections::BTreeMap;
use std::fmt;

/// Per-field validation failures, collected so one response can name
/// every offending field instead of just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `field`. The first message per field wins.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Converts the accumulated failures into a `Result`.
    pub fn into_result(self) -> Result<(), ReceiveError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ReceiveError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.fields {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

/// Errors produced by the receiver.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("unknown session: {0}")]
    NotFound(String),

    #[error("upload incomplete for session {session}: {} chunk(s) missing", missing.len())]
    IncompleteUpload { session: String, missing: Vec<u32> },

    #[error("storage error during {operation} for session {session}: {source}")]
    Storage {
        session: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("insufficient disk space: required {required} bytes, available {available} bytes")]
    InsufficientDiskSpace { required: u64, available: u64 },

    #[error("assembly failed for session {session}: {reason}")]
    Assembly { session: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReceiveError {
    /// Convenience for a single-field validation failure.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.push(field, message);
        Self::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_multiple_fields() {
        let mut errors = ValidationErrors::new();
        errors.push("chunkIndex", "must be less than totalChunks");
        errors.push("fileName", "contains path separators");
        assert!(!errors.is_empty());
        assert_eq!(errors.fields().len(), 2);
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn first_message_per_field_wins() {
        let mut errors = ValidationErrors::new();
        errors.push("sessionId", "is required");
        errors.push("sessionId", "something else");
        assert_eq!(errors.fields()["sessionId"], "is required");
    }

    #[test]
    fn empty_collection_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn display_joins_fields() {
        let mut errors = ValidationErrors::new();
        errors.push("a", "bad");
        errors.push("b", "worse");
        assert_eq!(errors.to_string(), "a: bad; b: worse");
    }

    #[test]
    fn incomplete_upload_counts_missing() {
        let err = ReceiveError::IncompleteUpload {
            session: "s".into(),
            missing: vec![1, 4, 5],
        };
        assert!(err.to_string().contains("3 chunk(s) missing"));
    }
}
