//! Object storage collaborator and an in-process implementation with
//! HMAC-signed download URLs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Duration;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object storage unavailable: {0}")]
    Unavailable(String),
    #[error("object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },
    #[error("invalid url signature")]
    InvalidSignature,
    #[error("signed url expired")]
    Expired,
}

/// Durable blob storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Issue a time-limited read URL for an existing object.
    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_seconds: u64,
    ) -> Result<String, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Query parameters carried by a signed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSignature {
    pub expires: i64,
    pub nonce: String,
    pub signature: String,
}

/// Process-local object storage that signs its own URLs.
///
/// URLs look like
/// `{base}/storage/{bucket}/{path}?expires=<unix>&nonce=<uuid>&signature=<hex>`.
pub struct LocalObjectStorage {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    secret: Vec<u8>,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl LocalObjectStorage {
    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            secret: secret.into(),
            base_url: base_url.into(),
            clock,
        }
    }

    /// Check a URL signature and its expiry.
    pub fn verify_signed_url(
        &self,
        bucket: &str,
        path: &str,
        signature: &UrlSignature,
    ) -> Result<(), StorageError> {
        let expected = self.sign(bucket, path, signature.expires, &signature.nonce)?;
        if expected.as_bytes().ct_eq(signature.signature.as_bytes()).unwrap_u8() != 1 {
            return Err(StorageError::InvalidSignature);
        }
        if self.clock.now().timestamp() >= signature.expires {
            return Err(StorageError::Expired);
        }
        Ok(())
    }

    /// Resolve a signed URL back to its object.
    pub fn open_signed(
        &self,
        bucket: &str,
        path: &str,
        signature: &UrlSignature,
    ) -> Result<StoredObject, StorageError> {
        self.verify_signed_url(bucket, path, signature)?;
        self.get(bucket, path)
    }

    fn get(&self, bucket: &str, path: &str) -> Result<StoredObject, StorageError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StorageError::Unavailable("object map lock poisoned".to_string()))?;
        objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
    }

    fn sign(&self, bucket: &str, path: &str, expires: i64, nonce: &str) -> Result<String, StorageError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| StorageError::Unavailable(format!("signing key rejected: {e}")))?;
        mac.update(format!("{bucket}/{path}\n{expires}\n{nonce}").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Unavailable("object map lock poisoned".to_string()))?;
        objects.insert(
            (bucket.to_string(), path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_seconds: u64,
    ) -> Result<String, StorageError> {
        self.get(bucket, path)?;

        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let expires = (self.clock.now() + Duration::seconds(ttl.min(i64::MAX / 1_000))).timestamp();
        let nonce = Uuid::new_v4().simple().to_string();
        let signature = self.sign(bucket, path, expires, &nonce)?;

        Ok(format!(
            "{}/storage/{bucket}/{path}?expires={expires}&nonce={nonce}&signature={signature}",
            self.base_url
        ))
    }
}
