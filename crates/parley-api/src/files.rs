use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use uuid::Uuid;

use parley_db::models::FileRow;
use parley_db::timestamp_now;
use parley_types::api::{Claims, UploadResponse};

use crate::convert::file_url;
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::Storage;

const DEFAULT_FILE_TYPE: &str = "application/octet-stream";
const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: Option<String>,
}

/// POST /api/files?name=... : raw body, `Content-Type` is the file type.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::bad_request("File is empty"));
    }

    let limit = state.config.max_upload_bytes;
    if bytes.len() > limit {
        return Err(ApiError::PayloadTooLarge { limit });
    }

    let file_name = clean_file_name(query.name.as_deref());
    let file_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_FILE_TYPE)
        .to_string();

    let file_id = Uuid::new_v4();
    let storage_name = Storage::storage_name(claims.sub, &file_name);
    let sha256 = state.storage.write(&storage_name, &bytes).await?;

    let row = FileRow {
        id: file_id.to_string(),
        owner_id: claims.sub.to_string(),
        storage_name: storage_name.clone(),
        file_name: file_name.clone(),
        file_type: file_type.clone(),
        size: bytes.len() as i64,
        sha256,
        created_at: timestamp_now(),
    };

    if let Err(e) = state.run_db(move |db| db.insert_file(&row)).await {
        // Don't leave an orphan on disk when the row never made it.
        if let Err(cleanup) = state.storage.delete_file(&storage_name).await {
            error!("Failed to remove orphaned upload {}: {}", storage_name, cleanup);
        }
        return Err(e);
    }

    info!(
        "{} uploaded {} ({} bytes) as {}",
        claims.username,
        file_name,
        bytes.len(),
        file_id
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id,
            file_url: file_url(&file_id.to_string()),
            file_name,
            file_type,
            size: bytes.len() as u64,
        }),
    ))
}

/// GET /api/files/{file_id}: stream the stored bytes with their content type.
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<Response, ApiError> {
    let row = state
        .run_db(move |db| db.get_file(&file_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let file = state.storage.open(&row.storage_name).await.map_err(|e| {
        error!("Upload {} missing on disk: {}", row.storage_name, e);
        ApiError::not_found("File not found")
    })?;

    let content_type =
        HeaderValue::from_str(&row.file_type).unwrap_or(HeaderValue::from_static(DEFAULT_FILE_TYPE));

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(row.size.max(0) as u64));
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("inline; filename=\"{}\"", row.file_name.replace('"', "")))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok(response)
}

/// Last path segment of the supplied name, trimmed and bounded.
fn clean_file_name(raw: Option<&str>) -> String {
    let name = raw
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() {
        return "upload".to_string();
    }
    name.chars().take(MAX_FILE_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_lose_their_directories() {
        assert_eq!(clean_file_name(Some("../../etc/passwd")), "passwd");
        assert_eq!(clean_file_name(Some("C:\\Users\\me\\photo.png")), "photo.png");
        assert_eq!(clean_file_name(Some("  notes.txt ")), "notes.txt");
        assert_eq!(clean_file_name(Some("dir/")), "upload");
        assert_eq!(clean_file_name(None), "upload");
    }
}
