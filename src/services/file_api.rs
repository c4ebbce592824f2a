use std::path::Path;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use crate::error::{Error, Result};
use crate::models::{FileKind, FileReference};
use super::api_client::{segment, ApiClient};

const BLOCKED_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "sh", "msi", "dll", "js"];

/// A downloaded file body with the name the server suggested for it.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Attachment upload and download.
#[derive(Debug, Clone)]
pub struct FileApi {
    http: ApiClient,
    max_upload_bytes: u64,
}

impl FileApi {
    pub fn new(http: ApiClient, max_upload_bytes: u64) -> Self {
        Self {
            http,
            max_upload_bytes,
        }
    }

    pub async fn upload(&self, path: &Path) -> Result<FileReference> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::validation("file", "File has no usable name"))?
            .to_string();

        let size = tokio::fs::metadata(path).await?.len();
        validate_upload(&name, size, self.max_upload_bytes)?;

        let bytes = tokio::fs::read(path).await?;
        self.upload_bytes(&name, bytes).await
    }

    pub async fn upload_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<FileReference> {
        validate_upload(name, bytes.len() as u64, self.max_upload_bytes)?;

        let kind = FileKind::from_name(name);
        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(kind.mime_type(name))?;
        let form = Form::new().part("file", part);

        let file: FileReference = self
            .http
            .send_json(self.http.request(Method::POST, "/files").multipart(form))
            .await?;
        tracing::info!(file_id = %file.id, name = %file.name, "uploaded file");
        Ok(file)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<FileReference> {
        self.http.get_json(&format!("/files/{}", segment(file_id))).await
    }

    pub async fn download(&self, file_id: &str) -> Result<DownloadedFile> {
        let response = self
            .http
            .send(
                self.http
                    .request(Method::GET, &format!("/files/{}/download", segment(file_id))),
            )
            .await?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(file_name_from_disposition);
        let bytes = response.bytes().await?.to_vec();

        Ok(DownloadedFile { file_name, bytes })
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.http.delete(&format!("/files/{}", segment(file_id))).await
    }
}

pub fn validate_upload(name: &str, size: u64, max_bytes: u64) -> Result<()> {
    if size == 0 {
        return Err(Error::validation("file", "File is empty"));
    }
    if size > max_bytes {
        return Err(Error::validation(
            "file",
            &format!(
                "File is too large ({} MB max)",
                max_bytes / (1024 * 1024)
            ),
        ));
    }

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if let Some(ext) = ext {
        if BLOCKED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::validation("file", &format!(".{} files are not allowed", ext)));
        }
    }
    Ok(())
}

/// Extract the filename from a `Content-Disposition` header value,
/// preferring the RFC 5987 `filename*` form.
pub fn file_name_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').map(str::trim) {
        if let Some(encoded) = param.strip_prefix("filename*=") {
            let encoded = encoded.trim_matches('"');
            let raw = encoded.split("''").nth(1).unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(raw) {
                return Some(decoded.into_owned());
            }
        } else if let Some(name) = param.strip_prefix("filename=") {
            plain = Some(name.trim_matches('"').to_string());
        }
    }
    plain.filter(|n| !n.is_empty())
}
