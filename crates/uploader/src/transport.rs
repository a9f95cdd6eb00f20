//! HTTP transports for chunk submission and session control.
//!
//! The pump is parametric over [`ChunkTransport`] (how chunk bytes get
//! to the server — multipart form or raw binary body) and
//! [`SessionControl`] (the non-chunk calls: resume, status, finalize,
//! cancel). Both are implemented here on top of one `reqwest::Client`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chunkferry_protocol::{
    ChunkMeta, ErrorEnvelope, HEADER_CHUNK_INDEX, HEADER_FILE_NAME, HEADER_SESSION_ID,
    HEADER_TOTAL_CHUNKS, PART_CHUNK_INDEX, PART_FILE, PART_FILE_NAME, PART_SESSION_ID,
    PART_TOTAL_CHUNKS, ResumeQuery, ResumeRecord, SessionSnapshot,
};

use crate::error::{SendFailure, UploaderError};

/// Default per-chunk request timeout.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SendFailure>> + Send + 'a>>;

pub type ControlFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, UploaderError>> + Send + 'a>>;

/// Capability to deliver one chunk to the server.
pub trait ChunkTransport: Send + Sync {
    fn send_chunk(&self, meta: ChunkMeta, data: Vec<u8>) -> TransportFuture<'_>;
}

/// Capability for the non-chunk session calls.
pub trait SessionControl: Send + Sync {
    fn resume(&self, session_id: &str, query: &ResumeQuery) -> ControlFuture<'_, ResumeRecord>;
    fn status(&self, session_id: &str) -> ControlFuture<'_, Option<SessionSnapshot>>;
    fn finalize(&self, session_id: &str) -> ControlFuture<'_, ()>;
    fn cancel(&self, session_id: &str) -> ControlFuture<'_, ()>;
}

fn normalize_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Pulls a human-readable message out of an error response body,
/// preferring the envelope's `message` field.
fn message_from_body(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.message,
        Err(_) if body.is_empty() => "no response body".to_string(),
        Err(_) => body.chars().take(200).collect(),
    }
}

async fn check_send_response(resp: reqwest::Response) -> Result<(), SendFailure> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SendFailure::Status {
        status: status.as_u16(),
        message: message_from_body(&body),
    })
}

async fn check_api_response(resp: reqwest::Response) -> Result<reqwest::Response, UploaderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(UploaderError::Server {
        status: status.as_u16(),
        message: message_from_body(&body),
    })
}

/// Sends chunks as `multipart/form-data` to `POST /upload`.
#[derive(Debug, Clone)]
pub struct MultipartTransport {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl MultipartTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, DEFAULT_CHUNK_TIMEOUT)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
            timeout,
        }
    }
}

impl ChunkTransport for MultipartTransport {
    fn send_chunk(&self, meta: ChunkMeta, data: Vec<u8>) -> TransportFuture<'_> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(data)
                .file_name(meta.file_name.clone().unwrap_or_else(|| "chunk".into()));
            let mut form = reqwest::multipart::Form::new()
                .text(PART_SESSION_ID, meta.session_id.clone())
                .text(PART_CHUNK_INDEX, meta.chunk_index.to_string())
                .text(PART_TOTAL_CHUNKS, meta.total_chunks.to_string())
                .part(PART_FILE, part);
            if let Some(name) = meta.file_name {
                form = form.text(PART_FILE_NAME, name);
            }

            let resp = self
                .http
                .post(format!("{}/upload", self.base_url))
                .multipart(form)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(SendFailure::from)?;
            check_send_response(resp).await
        })
    }
}

/// Sends chunks as a raw body with `X-*` headers to `POST /upload/binary`.
#[derive(Debug, Clone)]
pub struct BinaryTransport {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl BinaryTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, DEFAULT_CHUNK_TIMEOUT)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
            timeout,
        }
    }
}

impl ChunkTransport for BinaryTransport {
    fn send_chunk(&self, meta: ChunkMeta, data: Vec<u8>) -> TransportFuture<'_> {
        Box::pin(async move {
            let mut req = self
                .http
                .post(format!("{}/upload/binary", self.base_url))
                .header(HEADER_SESSION_ID, &meta.session_id)
                .header(HEADER_CHUNK_INDEX, meta.chunk_index.to_string())
                .header(HEADER_TOTAL_CHUNKS, meta.total_chunks.to_string())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream");
            if let Some(name) = &meta.file_name {
                req = req.header(HEADER_FILE_NAME, name);
            }

            let resp = req
                .body(data)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(SendFailure::from)?;
            check_send_response(resp).await
        })
    }
}

/// Client for the non-chunk endpoints.
///
/// Finalize deliberately carries no timeout: assembly is bounded by the
/// server's disk, not the network.
#[derive(Debug, Clone)]
pub struct ServerApi {
    http: reqwest::Client,
    base_url: String,
}

impl ServerApi {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Status of every session the server knows about.
    pub async fn status_all(&self) -> Result<Vec<SessionSnapshot>, UploaderError> {
        let resp = self
            .http
            .get(format!("{}/upload", self.base_url))
            .send()
            .await?;
        Ok(check_api_response(resp).await?.json().await?)
    }

    /// Sessions the server reports as resumable.
    pub async fn resumable(&self) -> Result<Vec<SessionSnapshot>, UploaderError> {
        let resp = self
            .http
            .get(format!("{}/upload/resumable", self.base_url))
            .send()
            .await?;
        Ok(check_api_response(resp).await?.json().await?)
    }
}

impl SessionControl for ServerApi {
    fn resume(&self, session_id: &str, query: &ResumeQuery) -> ControlFuture<'_, ResumeRecord> {
        let url = format!("{}/upload/{session_id}/resume", self.base_url);
        let query = query.clone();
        Box::pin(async move {
            let resp = self.http.post(url).query(&query).send().await?;
            Ok(check_api_response(resp).await?.json().await?)
        })
    }

    fn status(&self, session_id: &str) -> ControlFuture<'_, Option<SessionSnapshot>> {
        let url = format!("{}/upload/{session_id}", self.base_url);
        Box::pin(async move {
            let resp = self.http.get(url).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            Ok(Some(check_api_response(resp).await?.json().await?))
        })
    }

    fn finalize(&self, session_id: &str) -> ControlFuture<'_, ()> {
        let url = format!("{}/upload/{session_id}/complete", self.base_url);
        Box::pin(async move {
            let resp = self.http.post(url).send().await?;
            check_api_response(resp).await?;
            Ok(())
        })
    }

    fn cancel(&self, session_id: &str) -> ControlFuture<'_, ()> {
        let url = format!("{}/upload/{session_id}", self.base_url);
        Box::pin(async move {
            let resp = self.http.delete(url).send().await?;
            check_api_response(resp).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = ServerApi::new("http://localhost:8080/");
        assert_eq!(api.base_url(), "http://localhost:8080");
        let api = ServerApi::new("http://localhost:8080");
        assert_eq!(api.base_url(), "http://localhost:8080");
    }

    #[test]
    fn message_prefers_envelope() {
        let body = serde_json::to_string(&ErrorEnvelope::new(
            400,
            "Bad Request",
            "chunkIndex out of range",
            "/upload",
            chunkferry_protocol::ErrorCode::ValidationError,
            "t-1",
        ))
        .unwrap();
        assert_eq!(message_from_body(&body), "chunkIndex out of range");
    }

    #[test]
    fn message_falls_back_to_raw_body() {
        assert_eq!(message_from_body("plain failure"), "plain failure");
        assert_eq!(message_from_body(""), "no response body");
    }

    #[test]
    fn long_raw_bodies_are_truncated() {
        let body = "x".repeat(1000);
        assert_eq!(message_from_body(&body).len(), 200);
    }
}
