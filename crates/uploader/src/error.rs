//! Uploader error types.

/// One failed chunk send, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// Connection-level failure (refused, reset, DNS, …).
    Transport(String),
    /// The per-request timeout elapsed.
    Timeout,
    /// The server answered with a non-success status.
    Status { status: u16, message: String },
    /// The send was aborted by pause or cancel.
    Cancelled,
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<reqwest::Error> for SendFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Errors produced by the uploader.
#[derive(Debug, thiserror::Error)]
pub enum UploaderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("chunk {chunk} failed after {attempts} attempt(s): {reason}")]
    RetriesExhausted {
        chunk: u32,
        attempts: u32,
        reason: String,
    },

    #[error("chunk index {0} out of range")]
    ChunkOutOfRange(u32),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_failure_display() {
        assert_eq!(SendFailure::Timeout.to_string(), "request timed out");
        assert_eq!(
            SendFailure::Status {
                status: 503,
                message: "busy".into()
            }
            .to_string(),
            "HTTP 503: busy"
        );
    }

    #[test]
    fn retries_exhausted_names_chunk() {
        let err = UploaderError::RetriesExhausted {
            chunk: 7,
            attempts: 3,
            reason: "HTTP 500: boom".into(),
        };
        assert!(err.to_string().contains("chunk 7"));
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
