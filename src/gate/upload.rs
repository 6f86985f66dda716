//! Upload admission checks

use crate::checksum::{Checksum, ChecksumEngine};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Limits applied before anything is written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    pub max_size: Option<u64>,
    /// Admitted MIME types; `None` or empty admits everything
    pub allowed_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadValidation {
    pub valid: bool,
    pub error: Option<String>,
    /// Checksum of the admitted bytes; `None` when rejected
    pub checksum: Option<Checksum>,
    pub size: u64,
    pub content_type: String,
}

/// MIME type from a file name's extension
pub fn content_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("ogv") => "video/ogg",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Human-readable size, e.g. `1.50 KB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Admit or reject an upload; never touches storage
pub fn validate_for_upload(
    engine: &ChecksumEngine,
    name: &str,
    data: &[u8],
    policy: &UploadPolicy,
) -> UploadValidation {
    let size = data.len() as u64;
    let content_type = content_type_for(name).to_string();

    let rejected = |error: String, content_type: String| UploadValidation {
        valid: false,
        error: Some(error),
        checksum: None,
        size,
        content_type,
    };

    if let Some(max) = policy.max_size {
        if size > max {
            return rejected(
                format!(
                    "File size ({}) exceeds maximum allowed size ({})",
                    format_bytes(size),
                    format_bytes(max)
                ),
                content_type,
            );
        }
    }

    if let Some(allowed) = policy.allowed_types.as_ref().filter(|a| !a.is_empty()) {
        if !allowed.iter().any(|t| t.eq_ignore_ascii_case(&content_type)) {
            let error = format!("File type {} is not allowed", content_type);
            return rejected(error, content_type);
        }
    }

    UploadValidation {
        valid: true,
        error: None,
        checksum: Some(engine.checksum(data)),
        size,
        content_type,
    }
}
