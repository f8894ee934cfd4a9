use std::path::PathBuf;

use crate::error::AppError;
use crate::prompts::DocumentMeta;
use crate::server::payload::UploadedFile;

/// Keeps ASCII letters, digits, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    // 只取最后一段，避免路径穿越
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub async fn save(&self, file: &UploadedFile) -> Result<DocumentMeta, AppError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stored_name = format!(
            "{}-{}",
            uuid::Uuid::new_v4(),
            sanitize_file_name(&file.file_name)
        );
        let path = self.dir.join(&stored_name);
        tokio::fs::write(&path, &file.bytes).await?;
        tracing::info!(
            file = %file.file_name,
            stored = %path.display(),
            size = file.bytes.len(),
            "document saved"
        );
        Ok(DocumentMeta {
            name: file.file_name.clone(),
            stored_name,
            size: file.bytes.len() as u64,
            content_type: file.content_type.clone(),
        })
    }

    /// Saves every file, or none of them.
    pub async fn save_all(&self, files: &[UploadedFile]) -> Result<Vec<DocumentMeta>, AppError> {
        let mut out = Vec::with_capacity(files.len());
        for f in files {
            match self.save(f).await {
                Ok(meta) => out.push(meta),
                Err(e) => {
                    self.discard(&out).await;
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    /// Saves `files`, then hands their metadata to `record`. When `record` fails
    /// the saved files are removed again.
    pub async fn save_with<T, F, Fut>(
        &self,
        files: &[UploadedFile],
        record: F,
    ) -> Result<T, AppError>
    where
        F: FnOnce(Vec<DocumentMeta>) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let documents = self.save_all(files).await?;
        let saved = documents.clone();
        match record(documents).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.discard(&saved).await;
                Err(e)
            }
        }
    }

    pub async fn discard(&self, documents: &[DocumentMeta]) {
        for doc in documents {
            match tokio::fs::remove_file(self.dir.join(&doc.stored_name)).await {
                Ok(()) => tracing::debug!(stored = %doc.stored_name, "document removed"),
                Err(e) => tracing::warn!(
                    stored = %doc.stored_name,
                    error = %e,
                    "failed to remove document"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    #[test]
    fn sanitize_strips_paths_and_odd_chars() {
        assert_eq!(sanitize_file_name("report 2024.pdf"), "report_2024.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\notes.txt"), "notes.txt");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("résumé.txt"), "r_sum_.txt");
    }

    fn upload(name: &str, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            field: "documents".into(),
            file_name: name.into(),
            content_type: "text/plain".into(),
            bytes: Bytes::from_static(bytes),
        }
    }

    fn stored_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn save_writes_uuid_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));
        let meta = store.save(&upload("my notes.txt", b"hello")).await.unwrap();
        assert_eq!(meta.name, "my notes.txt");
        assert_eq!(meta.size, 5);
        assert!(meta.stored_name.ends_with("-my_notes.txt"));
        assert!(!meta.stored_name.contains('/'));
        let on_disk = dir.path().join("uploads").join(&meta.stored_name);
        assert_eq!(std::fs::read(on_disk).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn failed_record_removes_saved_files() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let store = UploadStore::new(uploads.clone());
        let files = [upload("a.txt", b"a"), upload("b.txt", b"b")];

        let err = store
            .save_with(&files, |docs| async move {
                assert_eq!(docs.len(), 2);
                Err::<(), _>(AppError::NotFound("Prompt not found".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(stored_files(&uploads), 0);

        let kept = store
            .save_with(&files, |docs| async move { Ok::<_, AppError>(docs) })
            .await
            .unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(stored_files(&uploads), 2);
    }
}
