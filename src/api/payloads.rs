use axum::{
    body::to_bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::future::Future;
use tracing::warn;

use crate::{
    api::types::PayloadsResponse,
    error::ApiError,
    identity::AuthorizedDevice,
    model::payload::Payload,
    state::AppState,
    storage::StorageService,
};

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data_base64: String,
}

struct Upload {
    bytes: Vec<u8>,
    filename: Option<String>,
    mime_type: Option<String>,
}

pub async fn upload_payload(
    State(state): State<AppState>,
    Extension(device): Extension<AuthorizedDevice>,
    req: Request,
) -> Result<(StatusCode, Json<Payload>), ApiError> {
    let limit = state.config.max_upload_bytes;

    let upload = if is_multipart(req.headers()) {
        read_multipart(req, &state).await?
    } else {
        read_json(req, limit).await?
    };

    if upload.bytes.is_empty() {
        return Err(ApiError::validation("payload_empty"));
    }
    if upload.bytes.len() > limit {
        return Err(ApiError::validation("payload_too_large"));
    }

    let stored = state
        .storage
        .save(device.id(), &upload.bytes, upload.filename.as_deref())
        .await?;

    let payload = Payload {
        id: stored.id,
        device_id: device.id().to_string(),
        filename: stored.filename,
        original_name: upload.filename,
        mime_type: upload.mime_type,
        size: stored.size,
        created_ts: chrono::Utc::now().timestamp(),
    };
    record_or_discard(
        &state.storage,
        &payload.device_id,
        &payload.filename,
        state.db.save_payload(&payload),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(payload)))
}

/// Run the metadata write for a file already on disk; if it fails the file is
/// removed so no unreferenced blob is left behind.
async fn record_or_discard(
    storage: &StorageService,
    device_id: &str,
    filename: &str,
    record: impl Future<Output = anyhow::Result<()>>,
) -> Result<(), ApiError> {
    if let Err(err) = record.await {
        if let Err(cleanup) = storage.remove(device_id, filename).await {
            warn!(device_id, filename, error = ?cleanup, "failed to remove orphaned payload");
        }
        return Err(err.into());
    }
    Ok(())
}

async fn read_multipart(req: Request, state: &AppState) -> Result<Upload, ApiError> {
    let mut multipart = Multipart::from_request(req, state).await.map_err(|e| {
        ApiError::validation(format!(
            "Invalid multipart payload (check Content-Type boundary or use JSON upload): {e}"
        ))
    })?;

    let mut upload: Option<Upload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart payload: {e}")))?
    {
        if upload.is_some() {
            return Err(ApiError::validation(
                "Only one file per request is supported on this endpoint",
            ));
        }

        let filename = field.file_name().map(|s| s.to_string());
        let mime_type = field.content_type().map(|m| m.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("Failed to read field: {e}")))?;

        if bytes.is_empty() {
            continue;
        }

        upload = Some(Upload {
            bytes: bytes.to_vec(),
            filename,
            mime_type,
        });
    }

    upload.ok_or_else(|| ApiError::validation("No file found in multipart upload"))
}

async fn read_json(req: Request, limit: usize) -> Result<Upload, ApiError> {
    let (_parts, body) = req.into_parts();
    // base64 inflates by 4/3
    let body = to_bytes(body, limit.saturating_mul(4) / 3 + 4096)
        .await
        .map_err(|e| ApiError::validation(format!("Failed to read body: {e}")))?;

    let parsed: UploadRequest = serde_json::from_slice(&body).map_err(|e| {
        ApiError::validation(format!("Expected JSON (or multipart) upload: {e}"))
    })?;

    Ok(Upload {
        bytes: decode_base64_payload(&parsed.data_base64)?,
        filename: parsed.filename,
        mime_type: parsed.mime_type,
    })
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Accepts bare base64 or a `data:<mime>;base64,` URL.
fn decode_base64_payload(raw: &str) -> Result<Vec<u8>, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::validation("Empty base64 payload"));
    }

    let cleaned = match raw.split_once(',') {
        Some((prefix, rest)) if prefix.contains("base64") => rest,
        _ => raw,
    };

    STANDARD
        .decode(cleaned.trim())
        .map_err(|e| ApiError::validation(format!("Invalid base64: {e}")))
}

pub async fn list_payloads(
    State(state): State<AppState>,
    Extension(device): Extension<AuthorizedDevice>,
) -> Result<Json<PayloadsResponse>, ApiError> {
    let payloads = state.db.list_payloads(device.id()).await?;
    Ok(Json(PayloadsResponse {
        device_id: device.id().to_string(),
        payloads,
    }))
}

pub async fn download_payload(
    State(state): State<AppState>,
    Extension(device): Extension<AuthorizedDevice>,
    Path(payload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = state
        .db
        .load_payload(device.id(), &payload_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("payload_not_found".into()))?;

    let bytes = state.storage.read(device.id(), &payload.filename).await?;

    let mut headers = HeaderMap::new();
    let content_type = payload
        .mime_type
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", payload.filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    Ok((headers, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_metadata_write_removes_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageService::new(dir.path()).await.unwrap();
        let stored = storage.save("dev_a", b"payload", Some("a.bin")).await.unwrap();

        let err = record_or_discard(&storage, "dev_a", &stored.filename, async {
            Err(anyhow::anyhow!("registry unavailable"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert!(storage.read("dev_a", &stored.filename).await.is_err());
    }

    #[tokio::test]
    async fn successful_metadata_write_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageService::new(dir.path()).await.unwrap();
        let stored = storage.save("dev_a", b"payload", None).await.unwrap();

        record_or_discard(&storage, "dev_a", &stored.filename, async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(storage.read("dev_a", &stored.filename).await.unwrap(), b"payload");
    }

    #[test]
    fn accepts_data_urls_and_bare_base64() {
        assert_eq!(decode_base64_payload("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_base64_payload("data:text/plain;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
        assert!(decode_base64_payload("  ").is_err());
        assert!(decode_base64_payload("not base64!").is_err());
    }
}
