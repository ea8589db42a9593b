//! Rendered video asset storage.
//!
//! Assets are uploaded under `{folder}/{object_key}.mp4` and handed out
//! through time-limited URLs: either R2 presigned URLs, or CDN URLs carrying
//! an HMAC-signed token when a CDN base URL and signing secret are configured.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::client::R2Client;
use crate::error::{StorageError, StorageResult};

/// Presigned URLs cannot outlive seven days.
pub const MAX_URL_TTL_SECS: u64 = 604_800;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Where an asset should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// e.g. `videos/{userId}`
    pub folder: String,
    /// e.g. the video id
    pub object_key: String,
}

impl UploadTarget {
    pub fn new(folder: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            object_key: object_key.into(),
        }
    }

    /// Storage key, also used as the asset's public id.
    pub fn key(&self) -> StorageResult<String> {
        let folder = self.folder.trim_matches('/');
        let object = self.object_key.trim_matches('/');
        if folder.is_empty() || object.is_empty() || folder.contains("..") || object.contains("..")
        {
            return Err(StorageError::InvalidKey(format!("{}/{}", folder, object)));
        }
        Ok(format!("{}/{}.mp4", folder, object))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub public_id: String,
    pub secure_url: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Storage for finished renders.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, target: &UploadTarget) -> StorageResult<StoredAsset>;

    /// Time-limited download URL for a stored asset.
    async fn signed_url(&self, public_id: &str, ttl: Duration) -> StorageResult<SignedUrl>;
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryConfig {
    /// CDN origin fronting the bucket
    pub cdn_base_url: Option<String>,
    /// HMAC secret shared with the CDN worker
    pub signing_secret: Option<String>,
}

impl DeliveryConfig {
    pub fn from_env() -> Self {
        Self {
            cdn_base_url: std::env::var("CDN_BASE_URL").ok().filter(|s| !s.is_empty()),
            signing_secret: std::env::var("DELIVERY_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    fn cdn(&self) -> Option<(&str, &str)> {
        Some((self.cdn_base_url.as_deref()?, self.signing_secret.as_deref()?))
    }
}

/// Token the CDN worker verifies before serving `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryToken {
    pub key: String,
    /// Unix seconds
    pub exp: i64,
}

impl DeliveryToken {
    pub fn sign(&self, secret: &str) -> StorageResult<String> {
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(self).map_err(StorageError::signing)?,
        );
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(StorageError::signing)?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    /// Returns the token if the signature matches and it has not expired.
    pub fn verify(signed: &str, secret: &str, now: DateTime<Utc>) -> Option<Self> {
        let (payload, signature) = signed.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let token: Self = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
        (token.exp > now.timestamp()).then_some(token)
    }
}

/// Asset store backed by R2.
#[derive(Clone)]
pub struct R2AssetStore {
    r2: R2Client,
    delivery: DeliveryConfig,
}

impl R2AssetStore {
    pub fn new(r2: R2Client, delivery: DeliveryConfig) -> Self {
        Self { r2, delivery }
    }

    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Client::from_env()?, DeliveryConfig::from_env()))
    }

    pub fn client(&self) -> &R2Client {
        &self.r2
    }
}

#[async_trait]
impl AssetStore for R2AssetStore {
    async fn upload(&self, bytes: Vec<u8>, target: &UploadTarget) -> StorageResult<StoredAsset> {
        if bytes.is_empty() {
            return Err(StorageError::EmptyAsset);
        }
        let key = target.key()?;
        self.r2.put_render(&key, bytes, VIDEO_CONTENT_TYPE).await?;

        let secure = self
            .signed_url(&key, Duration::from_secs(MAX_URL_TTL_SECS))
            .await?;

        Ok(StoredAsset {
            public_id: key,
            secure_url: secure.url,
            thumbnail_url: None,
        })
    }

    async fn signed_url(&self, public_id: &str, ttl: Duration) -> StorageResult<SignedUrl> {
        let ttl = ttl.min(Duration::from_secs(MAX_URL_TTL_SECS));
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(StorageError::signing)?;

        let url = match self.delivery.cdn() {
            Some((base, secret)) => {
                let token = DeliveryToken {
                    key: public_id.to_string(),
                    exp: expires_at.timestamp(),
                }
                .sign(secret)?;
                format!(
                    "{}/{}?sig={}",
                    base.trim_end_matches('/'),
                    public_id,
                    urlencoding::encode(&token)
                )
            }
            None => self.r2.presign_download(public_id, ttl).await?,
        };

        debug!(public_id, ttl_secs = ttl.as_secs(), "Signed asset URL");
        Ok(SignedUrl { url, expires_at })
    }
}
