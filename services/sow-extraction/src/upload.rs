//! Staging of uploaded PDFs on disk for the pipeline.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sow_utils::{SowError, SowResult};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An uploaded file written under its own name in a private temp directory.
/// The directory is removed when this value is dropped.
pub struct StagedUpload {
    _dir: TempDir,
    path: PathBuf,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reduce a client-supplied filename to its final component and require a
/// `.pdf` extension.
pub fn sanitize_filename(filename: &str) -> SowResult<String> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| SowError::validation("file", "No filename provided"))?;

    if !name.to_lowercase().ends_with(".pdf") {
        return Err(SowError::validation("file", "Only PDF files are supported"));
    }
    Ok(name.to_string())
}

pub fn stage_upload(filename: &str, data: &[u8]) -> SowResult<StagedUpload> {
    let name = sanitize_filename(filename)?;
    if data.is_empty() {
        return Err(SowError::validation("file", "Uploaded file is empty"));
    }

    let dir = tempfile::tempdir()?;
    let path = dir.path().join(name);
    fs::write(&path, data)?;

    Ok(StagedUpload { _dir: dir, path })
}

pub fn decode_base64(content: &str) -> SowResult<Vec<u8>> {
    STANDARD
        .decode(content.trim())
        .map_err(|e| SowError::validation("content_base64", format!("Invalid base64 content: {}", e)))
}
