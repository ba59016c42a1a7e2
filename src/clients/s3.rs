use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;

use crate::{
    config::UploadConfig,
    error::{AppError, Result},
    services::uploads::UploadSigner,
};

/// Presigns S3 `PUT` requests.
#[derive(Clone)]
pub struct S3UploadSigner {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3UploadSigner {
    /// Builds a client from the ambient AWS credentials chain.
    pub async fn from_config(config: &UploadConfig) -> Self {
        let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()));

        if let Some(ref endpoint) = config.endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let s3_sdk_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        tracing::info!(
            "✅ S3 uploads enabled: bucket={}, prefix={}",
            config.bucket,
            config.key_prefix
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_sdk_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl UploadSigner for S3UploadSigner {
    async fn presign_put(&self, key: &str, content_type: &str, expires: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires)
            .map_err(|e| AppError::Internal(format!("Invalid presign expiry: {}", e)))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to presign upload: {}", e)))?;

        Ok(request.uri().to_string())
    }
}
