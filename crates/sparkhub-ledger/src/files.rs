use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("staged object {0:?} does not exist")]
    Missing(String),
    #[error("invalid file reference {0:?}")]
    InvalidRef(String),
    #[error("file store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blob storage collaborator for the upload flow. Uploads are staged out of
/// band; the ledger promotes a staged object to live storage only after the
/// purchase debit has committed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Move a staged object into permanent storage.
    async fn promote(&self, file_ref: &str) -> Result<(), FileStoreError>;
}

/// Directory-backed file store. Promotion is a rename from the staging root
/// to the live root, preserving the relative reference.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    staging: PathBuf,
    live: PathBuf,
}

impl LocalFileStore {
    pub fn new(staging: impl Into<PathBuf>, live: impl Into<PathBuf>) -> Self {
        Self {
            staging: staging.into(),
            live: live.into(),
        }
    }

    fn object_path(root: &Path, file_ref: &str) -> Result<PathBuf, FileStoreError> {
        // References are relative paths handed out at staging time; anything
        // that could escape the root is rejected outright.
        if file_ref.is_empty() || file_ref.starts_with('/') || file_ref.contains("..") {
            return Err(FileStoreError::InvalidRef(file_ref.to_string()));
        }
        Ok(root.join(file_ref))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn promote(&self, file_ref: &str) -> Result<(), FileStoreError> {
        let staged = Self::object_path(&self.staging, file_ref)?;
        let live = Self::object_path(&self.live, file_ref)?;
        if !tokio::fs::try_exists(&staged).await? {
            return Err(FileStoreError::Missing(file_ref.to_string()));
        }
        if let Some(parent) = live.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&staged, &live).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use speculoos::prelude::*;
    use uuid::Uuid;

    use super::{FileStore, FileStoreError, LocalFileStore};

    struct Scratch {
        root: std::path::PathBuf,
    }

    impl Scratch {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("sparkhub-files-{}", Uuid::new_v4()));
            Self { root }
        }

        fn staging(&self) -> std::path::PathBuf {
            self.root.join("staging")
        }

        fn live(&self) -> std::path::PathBuf {
            self.root.join("live")
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn promote_moves_staged_object_to_live() {
        let scratch = Scratch::new();
        tokio::fs::create_dir_all(scratch.staging()).await.unwrap();
        tokio::fs::write(scratch.staging().join("bundle.zip"), b"payload")
            .await
            .unwrap();

        let store = LocalFileStore::new(scratch.staging(), scratch.live());
        store.promote("bundle.zip").await.unwrap();

        assert_that!(scratch.live().join("bundle.zip").exists()).is_true();
        assert_that!(scratch.staging().join("bundle.zip").exists()).is_false();
    }

    #[tokio::test]
    async fn promote_missing_object_fails() {
        let scratch = Scratch::new();
        tokio::fs::create_dir_all(scratch.staging()).await.unwrap();

        let store = LocalFileStore::new(scratch.staging(), scratch.live());
        let err = store.promote("absent.zip").await.unwrap_err();
        assert!(matches!(err, FileStoreError::Missing(_)));
    }

    #[tokio::test]
    async fn promote_rejects_escaping_references() {
        let scratch = Scratch::new();
        let store = LocalFileStore::new(scratch.staging(), scratch.live());
        let err = store.promote("../outside.zip").await.unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidRef(_)));
    }
}
