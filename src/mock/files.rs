use std::sync::Arc;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;
use crate::models::{FileKind, FileReference};
use super::auth::current_user;
use super::error::MockError;
use super::state::{MockState, StoredFile};

pub fn routes() -> Router<Arc<MockState>> {
    Router::new()
        .route("/files", post(upload))
        .route("/files/:id", get(get_file).delete(delete_file))
        .route("/files/:id/download", get(download))
}

async fn upload(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileReference>), MockError> {
    current_user(&state, &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| MockError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| MockError::BadRequest(format!("Failed to read file: {e}")))?;

        let info = FileReference {
            id: uuid::Uuid::new_v4().to_string(),
            kind: FileKind::from_name(&name),
            size: Some(bytes.len() as u64),
            name,
            preview_url: None,
        };
        info!(file_id = %info.id, name = %info.name, size = bytes.len(), "mock file stored");

        state.data().write().await.files.insert(
            info.id.clone(),
            StoredFile {
                info: info.clone(),
                content_type,
                bytes: bytes.to_vec(),
            },
        );
        return Ok((StatusCode::CREATED, Json(info)));
    }

    Err(MockError::field("file", "No file was uploaded"))
}

async fn get_file(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<Json<FileReference>, MockError> {
    current_user(&state, &headers).await?;
    let data = state.data().read().await;
    data.files
        .get(&file_id)
        .map(|f| Json(f.info.clone()))
        .ok_or(MockError::NotFound("File"))
}

async fn download(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, MockError> {
    current_user(&state, &headers).await?;
    let data = state.data().read().await;
    let file = data.files.get(&file_id).ok_or(MockError::NotFound("File"))?;

    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        file.info.name.replace('"', ""),
        urlencoding::encode(&file.info.name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes.clone(),
    ))
}

async fn delete_file(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<StatusCode, MockError> {
    current_user(&state, &headers).await?;
    state
        .data()
        .write()
        .await
        .files
        .remove(&file_id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(MockError::NotFound("File"))
}
