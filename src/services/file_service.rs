use std::fs;
use std::path::{Path, PathBuf};
use crate::error::{Error, Result};

/// Environment variable that relocates all local state (config, session).
pub const HOME_ENV: &str = "SUPPLIER_PORTAL_HOME";

pub fn get_app_data_dir() -> Result<PathBuf> {
    let data_dir = match std::env::var_os(HOME_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not find data directory".to_string()))?
            .join("SupplierPortal"),
    };

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

pub fn get_downloads_dir(configured: Option<&Path>) -> Result<PathBuf> {
    let downloads_dir = match configured {
        Some(dir) => dir.to_path_buf(),
        None => dirs::download_dir()
            .map(|d| d.join("SupplierPortal"))
            .map_or_else(|| get_app_data_dir().map(|d| d.join("downloads")), Ok)?,
    };

    if !downloads_dir.exists() {
        fs::create_dir_all(&downloads_dir)?;
    }

    Ok(downloads_dir)
}

/// Turn a server-provided display name into a filesystem-safe one,
/// keeping the extension.
pub fn safe_file_name(name: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(slug::slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string());

    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(slug::slugify)
        .filter(|e| !e.is_empty())
    {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// Pick a path in `dir` for `file_name` that does not exist yet,
/// appending `-1`, `-2`, ... to the stem on collision.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(file_name);
    let ext = path.extension().and_then(|e| e.to_str());

    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{}-{}.{}", stem, n, ext)),
            None => dir.join(format!("{}-{}", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

pub fn save_download(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }

    let target = unique_path(dir, &safe_file_name(name));
    fs::write(&target, bytes)?;
    tracing::info!(path = %target.display(), size = bytes.len(), "saved download");
    Ok(target)
}

/// A backend-supplied preview link, accepted only when it points at a web
/// page.
pub fn web_preview_url(value: &str) -> Result<String> {
    let url = url::Url::parse(value.trim())
        .map_err(|e| Error::validation("previewUrl", &format!("Invalid preview URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url.into()),
        other => Err(Error::validation(
            "previewUrl",
            &format!("Refusing to open a {} preview link", other),
        )),
    }
}
