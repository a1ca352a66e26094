use crate::error::IngestError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Directory where uploads are written before extraction.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn stage(&self, bytes: &[u8]) -> Result<StagedFile, IngestError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Uuid::new_v4().simple().to_string());
        // The guard exists before the write so a partial file is removed too.
        let staged = StagedFile {
            path,
            checksum: digest_bytes(bytes),
        };
        tokio::fs::write(&staged.path, bytes).await?;
        Ok(staged)
    }
}

/// A staged upload; the file is deleted when this value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    checksum: String,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %error, "failed to remove staged upload");
            }
        }
    }
}
