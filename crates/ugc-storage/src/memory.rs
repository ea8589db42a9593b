//! In-memory asset store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::assets::{AssetStore, SignedUrl, StoredAsset, UploadTarget};
use crate::error::{StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryAssetStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, public_id: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(public_id)
            .cloned()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn upload(&self, bytes: Vec<u8>, target: &UploadTarget) -> StorageResult<StoredAsset> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::bucket("put_object", "memory store rejecting uploads"));
        }
        let key = target.key()?;
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), bytes);
        Ok(StoredAsset {
            secure_url: format!("memory://{}", key),
            public_id: key,
            thumbnail_url: None,
        })
    }

    async fn signed_url(&self, public_id: &str, ttl: Duration) -> StorageResult<SignedUrl> {
        if self.get(public_id).is_none() {
            return Err(StorageError::NotFound(public_id.to_string()));
        }
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        Ok(SignedUrl {
            url: format!("memory://{}?exp={}", public_id, expires_at.timestamp()),
            expires_at,
        })
    }
}
