use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime};

use crate::upload::{is_allowed, UploadError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub filename: String,
    pub created_at: NaiveDateTime,
}

/// Lists previously stored uploads, newest first.
///
/// Only regular files whose extension is whitelisted are returned. A missing
/// directory yields an empty list.
pub async fn list_uploads(
    dir: &Path,
    allowed_extensions: &[String],
) -> Result<Vec<HistoryEntry>, UploadError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(UploadError::Storage(format!(
                "list {}: {e}",
                dir.display()
            )))
        }
    };

    let mut uploads = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| UploadError::Storage(format!("read_dir entry: {e}")))?
    {
        let Ok(filename) = entry.file_name().into_string() else {
            continue;
        };
        if !is_allowed(&filename, allowed_extensions) {
            continue;
        }

        let metadata = entry
            .metadata()
            .await
            .map_err(|e| UploadError::Storage(format!("metadata {filename}: {e}")))?;
        if !metadata.is_file() {
            continue;
        }

        // Not every filesystem records a birth time.
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|e| UploadError::Storage(format!("timestamp {filename}: {e}")))?;

        uploads.push(HistoryEntry {
            filename,
            created_at: DateTime::<Local>::from(created).naive_local(),
        });
    }

    sort_newest_first(&mut uploads);
    tracing::debug!(count = uploads.len(), dir = %dir.display(), "listed uploads");
    Ok(uploads)
}

fn sort_newest_first(uploads: &mut [HistoryEntry]) {
    uploads.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.filename.cmp(&a.filename))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["png".into(), "jpg".into(), "jpeg".into()]
    }

    fn entry(filename: &str, created: &str) -> HistoryEntry {
        HistoryEntry {
            filename: filename.into(),
            created_at: NaiveDateTime::parse_from_str(created, "%Y-%m-%d %H:%M:%S").unwrap(),
        }
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = list_uploads(&tmp.path().join("absent"), &allowed())
            .await
            .unwrap();
        assert!(uploads.is_empty());
    }

    #[tokio::test]
    async fn empty_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = list_uploads(tmp.path(), &allowed()).await.unwrap();
        assert!(uploads.is_empty());
    }

    #[tokio::test]
    async fn skips_non_whitelisted_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.JPG", "notes.txt", "virus.exe", "anim.gif", ".upload-abc123"] {
            std::fs::write(tmp.path().join(name), b"data").unwrap();
        }
        std::fs::create_dir(tmp.path().join("folder.png")).unwrap();

        let mut names: Vec<String> = list_uploads(tmp.path(), &allowed())
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.filename)
            .collect();
        names.sort();

        assert_eq!(names, vec!["a.png".to_string(), "b.JPG".to_string()]);
    }

    #[test]
    fn sorts_newest_first_with_filename_tiebreak() {
        let mut uploads = vec![
            entry("old.png", "2024-01-01 09:00:00"),
            entry("a.png", "2024-01-02 09:00:00"),
            entry("b.png", "2024-01-02 09:00:00"),
            entry("mid.png", "2024-01-01 12:00:00"),
        ];
        sort_newest_first(&mut uploads);

        let names: Vec<&str> = uploads.iter().map(|u| u.filename.as_str()).collect();
        assert_eq!(names, vec!["b.png", "a.png", "mid.png", "old.png"]);
    }
}
