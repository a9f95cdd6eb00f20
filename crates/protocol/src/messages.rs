use serde::{Deserialize, Serialize};

/// Normalized metadata for one chunk submission.
///
/// Both upload endpoints (multipart form and raw binary with `X-*`
/// headers) reduce to this before reaching the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub session_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Query parameters of the resume handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeQuery {
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_meta_roundtrip() {
        let meta = ChunkMeta {
            session_id: "abc".into(),
            chunk_index: 7,
            total_chunks: 12,
            file_name: Some("data.bin".into()),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"chunkIndex\":7"));
        let back: ChunkMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn resume_query_parses_from_url_style_json() {
        let q: ResumeQuery =
            serde_json::from_str(r#"{"totalChunks":10,"fileSize":123456}"#).unwrap();
        assert_eq!(q.total_chunks, 10);
        assert_eq!(q.file_size, Some(123_456));
        assert!(q.file_name.is_none());
        assert!(q.chunk_size.is_none());
    }
}
