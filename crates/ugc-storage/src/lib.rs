//! Rendered video asset storage.
//!
//! Cloudflare R2 via the S3-compatible API, with presigned or CDN-signed
//! download URLs.

pub mod assets;
pub mod client;
pub mod error;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use assets::{
    AssetStore, DeliveryConfig, DeliveryToken, R2AssetStore, SignedUrl, StoredAsset,
    UploadTarget, MAX_URL_TTL_SECS,
};
pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};

#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryAssetStore;
