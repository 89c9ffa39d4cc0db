use crate::{
    error::{AppError, Result},
    models::StoredImage,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const IMAGE_EXTENSION: &str = "png";
pub const PUBLIC_PREFIX: &str = "/uploads";

/// Flat directory of uploaded images. The directory listing is the only
/// catalog; nothing is ever deleted by the server.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the store and its directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        store.ensure_dir().await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            AppError::StorageError(format!(
                "Failed to create {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Decodes `payload` (raw base64 or a data URL) and writes it under a
    /// fresh name. `base_url` is the scheme and host the client used.
    pub async fn save(&self, payload: &str, base_url: &str) -> Result<StoredImage> {
        let bytes = decode_payload(payload)?;

        let id = Uuid::new_v4();
        let filename = format!("{}.{}", id, IMAGE_EXTENSION);
        let file_path = self.root.join(&filename);

        self.ensure_dir().await?;

        // Only complete files ever appear under their final name.
        let partial_path = self.root.join(format!(".{}.part", filename));
        persist(&partial_path, &file_path, &bytes)
            .await
            .map_err(|e| {
                AppError::StorageError(format!("Failed to write {}: {}", file_path.display(), e))
            })?;

        log::info!("Stored {} bytes as {}", bytes.len(), filename);

        Ok(StoredImage {
            id,
            public_url: format!(
                "{}{}/{}",
                base_url.trim_end_matches('/'),
                PUBLIC_PREFIX,
                filename
            ),
            filename,
            file_path,
        })
    }

    /// Reads a stored image back. Returns `None` for unknown or unsafe names.
    pub async fn read(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        if !is_plain_filename(filename) {
            return Ok(None);
        }

        match tokio::fs::read(self.root.join(filename)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::StorageError(format!(
                "Failed to read {}: {}",
                filename, e
            ))),
        }
    }
}

/// Writes `bytes` to `partial`, then renames it onto `target`. The partial
/// file is removed if either step fails.
async fn persist(partial: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let written = match tokio::fs::write(partial, bytes).await {
        Ok(()) => tokio::fs::rename(partial, target).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        let _ = tokio::fs::remove_file(partial).await;
    }
    written
}

/// Strips an optional `data:<mime>;base64,` header and decodes the rest.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let encoded = match payload.find(";base64,") {
        Some(idx) => &payload[idx + ";base64,".len()..],
        None => payload,
    };
    let encoded = encoded.trim();

    if encoded.is_empty() {
        return Err(AppError::InvalidInput("Missing image data".into()));
    }

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| AppError::InvalidInput("Invalid base64 image data".into()))?;

    if bytes.is_empty() {
        return Err(AppError::InvalidInput("Missing image data".into()));
    }
    Ok(bytes)
}

fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}
