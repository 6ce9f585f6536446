use anyhow::Result;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

const SUFFIX_LEN: usize = 12;
const MAX_EXTENSION_LEN: usize = 16;

/// Manages on-disk storage for uploads.
///
/// Each upload is one flat file at `{dir}/{storage_name}`, where the storage
/// name is `{owner_id}{random suffix}.{ext}`. Only this module builds storage
/// names, so they never contain path separators.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn file_path(&self, storage_name: &str) -> PathBuf {
        self.dir.join(storage_name)
    }

    /// A fresh storage name for an upload by `owner_id`.
    pub fn storage_name(owner_id: Uuid, file_name: &str) -> String {
        let suffix: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!("{}{}.{}", owner_id, suffix, extension(file_name))
    }

    /// Write an upload and return its SHA-256 as lowercase hex.
    pub async fn write(&self, storage_name: &str, data: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let sha256 = hex::encode(hasher.finalize());

        let path = self.file_path(storage_name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(sha256)
    }

    pub async fn open(&self, storage_name: &str) -> Result<fs::File> {
        Ok(fs::File::open(self.file_path(storage_name)).await?)
    }

    pub async fn delete_file(&self, storage_name: &str) -> Result<()> {
        match fs::remove_file(self.file_path(storage_name)).await {
            Ok(()) => {
                info!("Deleted upload {}", storage_name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Upload {} already gone", storage_name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lowercase alphanumeric extension of `file_name`, or `bin`.
fn extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string())
}
