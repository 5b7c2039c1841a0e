//! Extension → MIME type lookup.

use std::path::Path;

use phf::phf_map;

/// Fallback for unknown extensions
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Known extensions (lowercase, without the dot)
pub static MIME_TYPES: phf::Map<&'static str, &'static str> = phf_map! {
    // Text
    "txt" => "text/plain",
    "md" => "text/markdown",
    "csv" => "text/csv",
    "html" => "text/html",
    "htm" => "text/html",
    "css" => "text/css",
    "js" => "text/javascript",
    "mjs" => "text/javascript",
    "xml" => "text/xml",
    "py" => "text/x-python",
    "rs" => "text/x-rust",
    "go" => "text/x-go",
    "json" => "application/json",
    "toml" => "application/toml",
    "yaml" => "application/yaml",
    "yml" => "application/yaml",
    "sh" => "application/x-sh",
    // Images
    "png" => "image/png",
    "jpg" => "image/jpeg",
    "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "bmp" => "image/bmp",
    "ico" => "image/x-icon",
    "svg" => "image/svg+xml",
    // Binary
    "pdf" => "application/pdf",
    "zip" => "application/zip",
    "gz" => "application/gzip",
    "tar" => "application/x-tar",
    "wasm" => "application/wasm",
    "mp3" => "audio/mpeg",
    "wav" => "audio/wav",
    "mp4" => "video/mp4",
};

/// Extensions sent as text regardless of their MIME type
const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "json", "xml", "csv"];

/// How a file's bytes are carried in a sampling request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    /// Sent verbatim as text
    Text,
    /// Sent as a base64 image
    Image,
    /// Sent as base64 binary
    Binary,
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// MIME type for a path, by extension
pub fn mime_for(path: &Path) -> &'static str {
    extension(path)
        .and_then(|ext| MIME_TYPES.get(ext.as_str()).copied())
        .unwrap_or(OCTET_STREAM)
}

/// Decide how a file is carried
pub fn classify(path: &Path, mime_type: &str) -> ContentClass {
    let is_text_ext = extension(path).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()));

    if mime_type.starts_with("text/") || is_text_ext {
        ContentClass::Text
    } else if mime_type.starts_with("image/") {
        ContentClass::Image
    } else {
        ContentClass::Binary
    }
}
