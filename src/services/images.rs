use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::photo::Photo;

/// Resolves a photo record to its raw image bytes.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, photo: &Photo) -> Result<Vec<u8>, ImageError>;
}

/// Reads the stored upload first and falls back to the photo's URL.
pub struct PhotoImageLoader {
    http: Client,
    upload_root: PathBuf,
    fetch_timeout: Duration,
}

impl PhotoImageLoader {
    pub fn new(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            http: Client::new(),
            upload_root: upload_root.into(),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Relative paths are resolved against the upload directory.
    fn resolve(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.upload_root.join(path)
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self
            .http
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(ImageError::Fetch)?;

        if !response.status().is_success() {
            return Err(ImageError::FetchStatus(response.status().as_u16()));
        }
        Ok(response.bytes().await.map_err(ImageError::Fetch)?.to_vec())
    }
}

#[async_trait]
impl ImageLoader for PhotoImageLoader {
    async fn load(&self, photo: &Photo) -> Result<Vec<u8>, ImageError> {
        if let Some(file_path) = photo.file_path.as_deref() {
            let path = self.resolve(file_path);
            match tokio::fs::read(&path).await {
                Ok(bytes) => return ensure_image(bytes),
                Err(e) => {
                    tracing::warn!(
                        photo_id = %photo.id,
                        path = %path.display(),
                        error = %e,
                        "Stored photo unreadable, trying URL"
                    );
                }
            }
        }

        match photo.url.as_deref() {
            Some(url) => ensure_image(self.fetch(url).await?),
            None => Err(ImageError::Missing),
        }
    }
}

/// Reject bytes that are not a recognizable image.
pub fn ensure_image(bytes: Vec<u8>) -> Result<Vec<u8>, ImageError> {
    image::guess_format(&bytes).map_err(|_| ImageError::InvalidFormat)?;
    Ok(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid photo: no readable file path or url")]
    Missing,

    #[error("invalid image format")]
    InvalidFormat,

    #[error("network error fetching image: {0}")]
    Fetch(reqwest::Error),

    #[error("image fetch returned HTTP {0}")]
    FetchStatus(u16),
}
