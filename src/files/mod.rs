//! Files offered to the analysis tool.
//!
//! Every lookup is confined to one root directory: names with `..` or an
//! absolute path are refused before touching the filesystem, and the
//! canonical path must still sit under the canonical root (which catches
//! symlinks pointing elsewhere).

mod analysis;
mod mime;

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use analysis::{
    analysis_request, format_report, AnalysisType, ANALYSIS_MAX_TOKENS, ANALYSIS_TEMPERATURE,
    ANALYSIS_TIMEOUT,
};
pub use mime::{classify, mime_for, ContentClass, MIME_TYPES, OCTET_STREAM};

use crate::error::{Result, SamplingError};
use crate::protocol::SamplingContent;

/// A listed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Detected MIME type
    pub mime_type: String,
}

/// A file read for analysis
#[derive(Debug, Clone)]
pub struct LoadedFile {
    /// Name as requested
    pub name: String,
    /// Detected MIME type
    pub mime_type: &'static str,
    /// How the bytes are carried
    pub class: ContentClass,
    /// Raw contents
    pub bytes: Vec<u8>,
}

impl LoadedFile {
    /// Sampling content for this file
    pub fn to_content(&self) -> SamplingContent {
        match self.class {
            ContentClass::Text => SamplingContent::text(String::from_utf8_lossy(&self.bytes)),
            ContentClass::Image => SamplingContent::image(&self.bytes, self.mime_type),
            ContentClass::Binary => SamplingContent::binary(&self.bytes, self.mime_type),
        }
    }
}

/// Read-only view of the files directory
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    /// Serve files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The files directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Regular files directly under the root, sorted by name
    pub fn list(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(FileEntry {
                mime_type: mime_for(Path::new(&name)).to_string(),
                name,
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Resolve a requested name to a path inside the root
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let requested = Path::new(filename);
        if filename.is_empty()
            || requested
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SamplingError::FileAccess(
                "Access denied: File must be within the files directory".to_string(),
            ));
        }

        let root = self.root.canonicalize().map_err(|e| {
            SamplingError::FileAccess(format!("Files directory {}: {e}", self.root.display()))
        })?;
        let path = match root.join(requested).canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SamplingError::FileNotFound(filename.to_string()))
            },
            Err(e) => return Err(e.into()),
        };

        if !path.starts_with(&root) {
            return Err(SamplingError::FileAccess(
                "Access denied: File must be within the files directory".to_string(),
            ));
        }
        if !path.is_file() {
            return Err(SamplingError::FileNotFound(filename.to_string()));
        }
        Ok(path)
    }

    /// Read a file for analysis
    pub fn load(&self, filename: &str) -> Result<LoadedFile> {
        let path = self.resolve(filename)?;
        let bytes = std::fs::read(&path)?;
        let mime_type = mime_for(&path);
        Ok(LoadedFile {
            name: filename.to_string(),
            mime_type,
            class: classify(&path, mime_type),
            bytes,
        })
    }
}
