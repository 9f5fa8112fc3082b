use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::domain::Attachment;
use crate::error::{WorkflowError, WorkflowResult};

/// Uploaded manuscripts and report attachments, kept flat in one folder and
/// addressed by an opaque reference.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Reference for a new upload: date prefix, short random id, then the
    /// sanitised client file name.
    pub fn generate_reference(filename: &str) -> String {
        let clean: String = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        format!(
            "{}_{}_{}",
            Utc::now().format("%Y%m%d"),
            &Uuid::new_v4().simple().to_string()[..8],
            clean
        )
    }

    fn path_of(&self, reference: &str) -> WorkflowResult<PathBuf> {
        if reference.is_empty() || reference.contains("..") || reference.contains('/') {
            return Err(WorkflowError::Validation(format!(
                "invalid file reference {reference:?}"
            )));
        }
        Ok(self.root.join(reference))
    }

    pub async fn save(&self, filename: &str, data: &[u8]) -> WorkflowResult<Attachment> {
        let reference = Self::generate_reference(filename);
        let path = self.path_of(&reference)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| WorkflowError::Persistence(format!("writing {}: {e}", path.display())))?;
        Ok(Attachment {
            reference,
            size_bytes: data.len() as u64,
        })
    }

    /// Resolves a reference to its attachment, with the size read from disk.
    pub async fn attachment(&self, reference: &str) -> WorkflowResult<Attachment> {
        let path = self.path_of(reference)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| WorkflowError::not_found(format!("file {reference}")))?;
        Ok(Attachment {
            reference: reference.to_string(),
            size_bytes: meta.len(),
        })
    }

    pub async fn read(&self, reference: &str) -> WorkflowResult<Vec<u8>> {
        let path = self.path_of(reference)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| WorkflowError::not_found(format!("file {reference}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saved_files_resolve_with_size() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path());
        let saved = files.save("my report.pdf", b"%PDF-1.7 ...").await.unwrap();
        assert!(saved.reference.ends_with("my_report.pdf"));

        let resolved = files.attachment(&saved.reference).await.unwrap();
        assert_eq!(resolved, saved);
        assert_eq!(files.read(&saved.reference).await.unwrap(), b"%PDF-1.7 ...");
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path());
        assert!(files.attachment("../etc/passwd").await.is_err());
        assert!(files.attachment("missing.pdf").await.is_err());
    }
}
