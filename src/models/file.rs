use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Document,
    Spreadsheet,
    Presentation,
    Image,
    Text,
    Archive,
    Other,
}

impl FileKind {
    /// Classify a file by the extension of its display name.
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "doc" | "docx" | "odt" | "rtf" => FileKind::Document,
            "xls" | "xlsx" | "ods" | "csv" => FileKind::Spreadsheet,
            "ppt" | "pptx" | "odp" => FileKind::Presentation,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" => FileKind::Image,
            "txt" | "md" | "json" | "xml" | "log" => FileKind::Text,
            "zip" | "tar" | "gz" | "7z" | "rar" => FileKind::Archive,
            _ => FileKind::Other,
        }
    }

    pub fn mime_type(&self, name: &str) -> &'static str {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match (self, ext.as_str()) {
            (FileKind::Pdf, _) => "application/pdf",
            (FileKind::Document, "docx") => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            (FileKind::Document, _) => "application/msword",
            (FileKind::Spreadsheet, "csv") => "text/csv",
            (FileKind::Spreadsheet, "xlsx") => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            (FileKind::Spreadsheet, _) => "application/vnd.ms-excel",
            (FileKind::Presentation, _) => "application/vnd.ms-powerpoint",
            (FileKind::Image, "png") => "image/png",
            (FileKind::Image, "gif") => "image/gif",
            (FileKind::Image, "webp") => "image/webp",
            (FileKind::Image, "svg") => "image/svg+xml",
            (FileKind::Image, _) => "image/jpeg",
            (FileKind::Text, "json") => "application/json",
            (FileKind::Text, "xml") => "application/xml",
            (FileKind::Text, "md") => "text/markdown",
            (FileKind::Text, _) => "text/plain",
            (FileKind::Archive, "zip") => "application/zip",
            _ => "application/octet-stream",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Pdf => "PDF",
            FileKind::Document => "Document",
            FileKind::Spreadsheet => "Spreadsheet",
            FileKind::Presentation => "Presentation",
            FileKind::Image => "Image",
            FileKind::Text => "Text",
            FileKind::Archive => "Archive",
            FileKind::Other => "File",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub id: String,
    pub name: String,
    pub kind: FileKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub preview_url: Option<String>,
}
