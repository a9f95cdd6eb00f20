//! HTTP handlers for the upload surface.

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};

use chunkferry_protocol::{
    ChunkMeta, HEADER_CHUNK_INDEX, HEADER_FILE_NAME, HEADER_SESSION_ID, HEADER_TOTAL_CHUNKS,
    PART_CHUNK_INDEX, PART_FILE, PART_FILE_NAME, PART_SESSION_ID, PART_TOTAL_CHUNKS,
    ResumeQuery, ResumeRecord, SessionSnapshot,
};
use chunkferry_receiver::ReceiveError;
use chunkferry_receiver::error::ValidationErrors;

use crate::AppState;
use crate::error::ApiError;

/// `POST /upload` — one chunk as a multipart form.
pub async fn upload_chunk_multipart(
    State(state): State<AppState>,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    let _permit = acquire_slot(&state, &uri)?;

    let mut session_id: Option<String> = None;
    let mut chunk_index: Option<String> = None;
    let mut total_chunks: Option<String> = None;
    let mut file_name: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::from_receive(
            ReceiveError::invalid_field("body", format!("malformed multipart body: {e}")),
            uri.path(),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();
        let read_err = |e: axum::extract::multipart::MultipartError| {
            ApiError::from_receive(
                ReceiveError::invalid_field(name.clone(), format!("unreadable part: {e}")),
                uri.path(),
            )
        };
        match name.as_str() {
            PART_FILE => data = Some(field.bytes().await.map_err(read_err)?.to_vec()),
            PART_SESSION_ID => session_id = Some(field.text().await.map_err(read_err)?),
            PART_CHUNK_INDEX => chunk_index = Some(field.text().await.map_err(read_err)?),
            PART_TOTAL_CHUNKS => total_chunks = Some(field.text().await.map_err(read_err)?),
            PART_FILE_NAME => file_name = Some(field.text().await.map_err(read_err)?),
            other => {
                tracing::debug!(part = %other, "ignoring unknown multipart part");
            }
        }
    }

    let (meta, data) = normalize(
        session_id,
        chunk_index,
        total_chunks,
        file_name,
        data,
        uri.path(),
    )?;

    state
        .coordinator
        .save_chunk(&meta, &data)
        .await
        .map_err(|e| ApiError::from_receive(e, uri.path()))?;
    Ok(StatusCode::OK)
}

/// `POST /upload/binary` — one chunk as a raw body with `X-*` headers.
pub async fn upload_chunk_binary(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, ApiError> {
    let _permit = acquire_slot(&state, &uri)?;

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    let (meta, data) = normalize(
        header(HEADER_SESSION_ID),
        header(HEADER_CHUNK_INDEX),
        header(HEADER_TOTAL_CHUNKS),
        header(HEADER_FILE_NAME),
        Some(body.to_vec()),
        uri.path(),
    )?;

    state
        .coordinator
        .save_chunk(&meta, &data)
        .await
        .map_err(|e| ApiError::from_receive(e, uri.path()))?;
    Ok(StatusCode::OK)
}

/// `POST /upload/{id}/complete` — finalize a session.
pub async fn complete_upload(
    State(state): State<AppState>,
    uri: Uri,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .finalize(&session_id)
        .await
        .map_err(|e| ApiError::from_receive(e, uri.path()))?;
    Ok(StatusCode::OK)
}

/// `DELETE /upload/{id}` — cancel a session.
pub async fn cancel_upload(
    State(state): State<AppState>,
    uri: Uri,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .cancel(&session_id)
        .await
        .map_err(|e| ApiError::from_receive(e, uri.path()))?;
    Ok(StatusCode::OK)
}

/// `POST /upload/{id}/resume` — resume handshake.
pub async fn resume_upload(
    State(state): State<AppState>,
    uri: Uri,
    Path(session_id): Path<String>,
    Query(query): Query<ResumeQuery>,
) -> Result<Json<ResumeRecord>, ApiError> {
    let record = state
        .coordinator
        .resume(&session_id, &query)
        .map_err(|e| ApiError::from_receive(e, uri.path()))?;
    Ok(Json(record))
}

/// `GET /upload/{id}` — status of one session.
pub async fn get_status(
    State(state): State<AppState>,
    uri: Uri,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .coordinator
        .status(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&session_id, uri.path()))
}

/// `GET /upload` — status of all sessions.
pub async fn list_uploads(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.coordinator.status_all())
}

/// `GET /upload/resumable` — sessions that can be resumed.
pub async fn list_resumable(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.coordinator.status_resumable())
}

fn acquire_slot<'a>(
    state: &'a AppState,
    uri: &Uri,
) -> Result<tokio::sync::SemaphorePermit<'a>, ApiError> {
    state
        .upload_slots
        .try_acquire()
        .map_err(|_| ApiError::busy(uri.path()))
}

/// Folds the raw request parts into a validated-shape [`ChunkMeta`].
/// Field-level semantics (ranges, names, extensions) are the
/// coordinator's validator's job; this only handles presence and
/// integer syntax.
fn normalize(
    session_id: Option<String>,
    chunk_index: Option<String>,
    total_chunks: Option<String>,
    file_name: Option<String>,
    data: Option<Vec<u8>>,
    path: &str,
) -> Result<(ChunkMeta, Vec<u8>), ApiError> {
    let mut errors = ValidationErrors::new();

    if session_id.as_deref().unwrap_or("").trim().is_empty() {
        errors.push("sessionId", "sessionId is required");
    }
    let chunk_index = match chunk_index.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push("chunkIndex", "chunkIndex is required");
            None
        }
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) => Some(v),
            Err(_) => {
                errors.push("chunkIndex", "chunkIndex must be a non-negative integer");
                None
            }
        },
    };
    let total_chunks = match total_chunks.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push("totalChunks", "totalChunks is required");
            None
        }
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) => Some(v),
            Err(_) => {
                errors.push("totalChunks", "totalChunks must be a positive integer");
                None
            }
        },
    };
    if data.is_none() {
        errors.push("file", "file part is required");
    }

    if let Err(e) = errors.into_result() {
        return Err(ApiError::from_receive(e, path));
    }

    // Presence was verified above; the defaults are unreachable.
    let meta = ChunkMeta {
        session_id: session_id.unwrap_or_default(),
        chunk_index: chunk_index.unwrap_or_default(),
        total_chunks: total_chunks.unwrap_or_default(),
        file_name: file_name.filter(|n| !n.is_empty()),
    };
    Ok((meta, data.unwrap_or_default()))
}
