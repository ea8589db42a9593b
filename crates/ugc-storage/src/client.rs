//! Rendered-video bucket on Cloudflare R2 (S3 API).

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::info;

use crate::error::{StorageError, StorageResult};

/// Renders never change once written.
const RENDER_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Clone)]
pub struct R2Config {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// "auto" on R2
    pub region: String,
}

fn required(name: &str) -> StorageResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StorageError::Config(format!("{} is not set", name)))
}

impl R2Config {
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: required("R2_ENDPOINT_URL")?,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required("R2_BUCKET_NAME")?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

#[derive(Clone)]
pub struct R2Client {
    s3: Client,
    bucket: String,
}

impl R2Client {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "ugc-r2",
        );
        let s3_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            s3: Client::from_conf(s3_config),
            bucket: config.bucket_name,
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        R2Config::from_env().map(Self::new)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Write a finished render. Overwrites any earlier object at `key`, so a
    /// redelivered upload of the same attempt is harmless.
    pub async fn put_render(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let size = bytes.len();
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .cache_control(RENDER_CACHE_CONTROL)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::bucket("put_object", e))?;

        info!(key, size, bucket = %self.bucket, "Stored render");
        Ok(())
    }

    /// Presigned GET that downloads as an attachment named after the key.
    pub async fn presign_download(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let presigning = PresigningConfig::expires_in(ttl).map_err(StorageError::signing)?;
        let filename = key.rsplit('/').next().unwrap_or(key);

        let request = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .response_content_disposition(format!("attachment; filename=\"{}\"", filename))
            .presigned(presigning)
            .await
            .map_err(StorageError::signing)?;

        Ok(request.uri().to_string())
    }
}
