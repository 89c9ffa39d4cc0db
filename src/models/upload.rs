use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub image_url: String,
}

/// An image written to the upload directory.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub id: Uuid,
    pub filename: String,
    pub file_path: PathBuf,
    pub public_url: String,
}

impl From<StoredImage> for UploadResponse {
    fn from(stored: StoredImage) -> Self {
        Self {
            success: true,
            filename: stored.filename,
            image_url: stored.public_url,
        }
    }
}
