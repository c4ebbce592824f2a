use std::path::PathBuf;
use crate::models::FileReference;
use crate::services::file_service;
use crate::state::AppState;

pub async fn upload_file(state: &AppState, path: PathBuf) -> Result<FileReference, String> {
    state.files.upload(&path).await.map_err(|e| e.to_string())
}

pub async fn get_file_info(state: &AppState, file_id: String) -> Result<FileReference, String> {
    state.files.get_file(&file_id).await.map_err(|e| e.to_string())
}

/// Download a file into the configured downloads folder.
pub async fn download_file(state: &AppState, file_id: String) -> Result<PathBuf, String> {
    let file = state.files.download(&file_id).await.map_err(|e| e.to_string())?;

    let name = match file.file_name {
        Some(name) => name,
        None => state
            .files
            .get_file(&file_id)
            .await
            .map(|f| f.name)
            .unwrap_or_else(|_| file_id.clone()),
    };

    let dir = file_service::get_downloads_dir(state.config.download_dir.as_deref())
        .map_err(|e| e.to_string())?;
    file_service::save_download(&dir, &name, &file.bytes).map_err(|e| e.to_string())
}

/// Open a file's preview in the system viewer, downloading it first when
/// the backend has no preview URL for it.
pub async fn open_file_preview(state: &AppState, file_id: String) -> Result<String, String> {
    let info = state.files.get_file(&file_id).await.map_err(|e| e.to_string())?;

    let target = match info.preview_url {
        Some(url) => file_service::web_preview_url(&url).map_err(|e| e.to_string())?,
        None => download_file(state, file_id)
            .await?
            .to_string_lossy()
            .into_owned(),
    };

    open::that(&target).map_err(|e| format!("Failed to open preview: {}", e))?;
    Ok(target)
}

pub async fn delete_file(state: &AppState, file_id: String) -> Result<(), String> {
    state.files.delete_file(&file_id).await.map_err(|e| e.to_string())
}
