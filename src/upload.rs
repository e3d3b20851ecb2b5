use std::io::Write;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use chrono::{Local, NaiveDateTime};
use image::ImageFormat;

/// Prefix prepended to every stored filename, e.g. `20240101_100000_`.
pub const TIMESTAMP_PREFIX_FORMAT: &str = "%Y%m%d_%H%M%S_";

/// Stem used when nothing printable survives sanitization.
const FALLBACK_STEM: &str = "upload";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFile {
    #[error("no file selected")]
    Missing,

    #[error("file type not allowed: {0}")]
    DisallowedType(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid file: {0}")]
    InvalidFile(#[from] InvalidFile),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Metadata for a file persisted by [`UploadStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub original_filename: String,
    pub stored_filename: String,
    pub storage_path: PathBuf,
    pub created_at: NaiveDateTime,
}

/// Validates uploads against an extension whitelist and writes them to a
/// single flat directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, allowed_extensions: &[String]) -> Self {
        Self {
            dir: dir.into(),
            allowed_extensions: allowed_extensions
                .iter()
                .map(|ext| ext.trim().to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn validate(&self, claimed_filename: &str) -> Result<(), InvalidFile> {
        if claimed_filename.trim().is_empty() {
            return Err(InvalidFile::Missing);
        }
        if !is_allowed(claimed_filename, &self.allowed_extensions) {
            return Err(InvalidFile::DisallowedType(claimed_filename.to_string()));
        }
        Ok(())
    }

    pub async fn store(
        &self,
        claimed_filename: &str,
        data: Bytes,
    ) -> Result<UploadRecord, UploadError> {
        self.store_at(claimed_filename, data, Local::now().naive_local())
            .await
    }

    /// Same as [`store`](Self::store) with an explicit upload time.
    pub async fn store_at(
        &self,
        claimed_filename: &str,
        data: Bytes,
        now: NaiveDateTime,
    ) -> Result<UploadRecord, UploadError> {
        self.validate(claimed_filename)?;

        let stored_filename = format!(
            "{}{}",
            now.format(TIMESTAMP_PREFIX_FORMAT),
            sanitize_filename(claimed_filename)
        );

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| UploadError::Storage(format!("mkdir {}: {e}", self.dir.display())))?;

        let dir = self.dir.clone();
        let name = stored_filename.clone();
        let storage_path = tokio::task::spawn_blocking(move || write_atomic(&dir, &name, &data))
            .await
            .map_err(|e| UploadError::Storage(format!("write task failed: {e}")))?
            .map_err(|e| UploadError::Storage(format!("write {stored_filename}: {e}")))?;

        tracing::info!(
            original = claimed_filename,
            stored = %stored_filename,
            "upload stored"
        );

        Ok(UploadRecord {
            original_filename: claimed_filename.to_string(),
            stored_filename,
            storage_path,
            created_at: now,
        })
    }
}

/// Writes into a temp file inside `dir` and renames it into place. The rename
/// refuses to replace an existing file, so a same-second name collision fails
/// instead of overwriting the earlier upload.
fn write_atomic(dir: &Path, stored_filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;

    let target = dir.join(stored_filename);
    tmp.persist_noclobber(&target).map_err(|e| e.error)?;
    Ok(target)
}

/// Extension of the last path component, without the dot.
pub fn extension(filename: &str) -> Option<&str> {
    let base = base_name(filename);
    match base.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => Some(ext),
        _ => None,
    }
}

pub fn is_allowed(filename: &str, allowed_extensions: &[String]) -> bool {
    extension(filename)
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            allowed_extensions.iter().any(|allowed| *allowed == ext)
        })
        .unwrap_or(false)
}

/// Content type served for a stored file, derived from its image format.
pub fn content_type(filename: &str) -> &'static str {
    match extension(filename).and_then(ImageFormat::from_extension) {
        Some(ImageFormat::Png) => "image/png",
        Some(ImageFormat::Jpeg) => "image/jpeg",
        Some(ImageFormat::Gif) => "image/gif",
        Some(ImageFormat::WebP) => "image/webp",
        Some(ImageFormat::Bmp) => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn base_name(filename: &str) -> &str {
    filename
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or(filename)
}

/// Reduces a client-supplied name to `[A-Za-z0-9._-]`, dropping any directory
/// components. The extension keeps its original case.
pub fn sanitize_filename(filename: &str) -> String {
    let base = base_name(filename);
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (base, None),
    };

    let mut stem = clean_component(stem);
    if stem.is_empty() {
        stem = FALLBACK_STEM.to_string();
    }

    let ext: String = ext
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

fn clean_component(raw: &str) -> String {
    let cleaned: String = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}
