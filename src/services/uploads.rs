use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::UploadConfig,
    error::{AppError, Result},
};

const MAX_FILENAME_LEN: usize = 200;

/// Issues time-limited upload URLs for an object store.
#[async_trait]
pub trait UploadSigner: Send + Sync {
    async fn presign_put(&self, key: &str, content_type: &str, expires: Duration) -> Result<String>;
}

/// A presigned upload handed to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PresignedUpload {
    pub presigned_url: String,
    /// The object key; send it back on upload-complete.
    pub filename: String,
    pub content_type: String,
    pub file_url: String,
}

/// Builds object keys and public URLs around an `UploadSigner`.
#[derive(Clone)]
pub struct UploadService {
    signer: Arc<dyn UploadSigner>,
    key_prefix: String,
    public_base_url: String,
    expires: Duration,
}

impl UploadService {
    pub fn new(signer: Arc<dyn UploadSigner>, config: &UploadConfig) -> Self {
        Self {
            signer,
            key_prefix: config.key_prefix.clone(),
            public_base_url: config.public_base_url.clone(),
            expires: config.url_expires,
        }
    }

    /// Presigns a `PUT` for a fresh, unique key derived from `filename`.
    ///
    /// # Arguments
    ///
    /// * `filename` - The client's file name.
    /// * `content_type` - The declared type; inferred from the extension if absent.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `PresignedUpload`.
    pub async fn presign(&self, filename: &str, content_type: Option<&str>) -> Result<PresignedUpload> {
        let clean = sanitize_filename(filename)?;
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| infer_content_type(&clean).to_string());
        if !content_type.starts_with("image/") {
            return Err(AppError::Validation("Only image uploads are supported".to_string()));
        }

        let key = format!("{}{}-{}", self.key_prefix, Uuid::new_v4(), clean);
        let presigned_url = self.signer.presign_put(&key, &content_type, self.expires).await?;
        tracing::info!("🖼️ Presigned upload issued for {}", key);

        Ok(PresignedUpload {
            presigned_url,
            file_url: self.public_url(&key)?,
            filename: key,
            content_type,
        })
    }

    /// The public URL for an uploaded object. Only keys under the configured
    /// prefix are accepted.
    pub fn public_url(&self, key: &str) -> Result<String> {
        let key = key.trim_start_matches('/');
        if !key.starts_with(&self.key_prefix) || key.contains("..") {
            return Err(AppError::Validation("Unknown upload key".to_string()));
        }
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

/// Strips path components and characters that do not belong in an object key.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let clean: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '\'' | '<' | '>' | '?' | '#' | '%' | '*' | '|' | ':'))
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .take(MAX_FILENAME_LEN)
        .collect();
    let clean = clean.trim_start_matches('.').to_string();

    if clean.is_empty() {
        return Err(AppError::Validation("A file name is required".to_string()));
    }
    Ok(clean)
}

/// Guesses an image content type from the file extension.
pub fn infer_content_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
