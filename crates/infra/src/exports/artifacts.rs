//! Artifact placement: durable object storage first, process-local
//! fallback second.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use exportkit_core::OwnerId;
use exportkit_exports::StorageKind;

use super::storage::{ObjectStorage, StorageError, StoredObject};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact is no longer held in memory")]
    Gone,
    #[error("download link expired")]
    Expired,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Where an artifact landed and how to download it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub storage: StorageKind,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct HeldBlob {
    object: StoredObject,
}

#[derive(Debug, Clone)]
struct Grant {
    key: (OwnerId, String),
    expires_at: DateTime<Utc>,
}

/// In-process artifact blobs addressed by opaque download tokens.
///
/// Contents are lost on restart.
#[derive(Debug, Default)]
pub struct EphemeralArtifacts {
    blobs: RwLock<HashMap<(OwnerId, String), HeldBlob>>,
    grants: RwLock<HashMap<String, Grant>>,
}

impl EphemeralArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, owner: OwnerId, path: &str, object: StoredObject) -> Result<(), ArtifactError> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        blobs.insert((owner, path.to_string()), HeldBlob { object });
        Ok(())
    }

    pub fn contains(&self, owner: OwnerId, path: &str) -> bool {
        self.blobs
            .read()
            .map(|b| b.contains_key(&(owner, path.to_string())))
            .unwrap_or(false)
    }

    /// Issue a new token for a held blob.
    ///
    /// Replaces any earlier token for the same blob and sweeps expired ones.
    pub fn grant(
        &self,
        owner: OwnerId,
        path: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, ArtifactError> {
        if !self.contains(owner, path) {
            return Err(ArtifactError::Gone);
        }
        let key = (owner, path.to_string());
        let token = Uuid::new_v4().simple().to_string();

        let mut grants = self.grants.write().map_err(poisoned)?;
        grants.retain(|_, g| g.expires_at > now && g.key != key);
        grants.insert(token.clone(), Grant { key, expires_at });
        Ok(token)
    }

    /// Number of outstanding download tokens.
    pub fn grant_count(&self) -> usize {
        self.grants.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Resolve a download token issued to `owner`.
    pub fn fetch(
        &self,
        owner: OwnerId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredObject, ArtifactError> {
        let grant = {
            let grants = self.grants.read().map_err(poisoned)?;
            grants
                .get(token)
                .filter(|g| g.key.0 == owner)
                .cloned()
                .ok_or(ArtifactError::Gone)?
        };
        if grant.expires_at <= now {
            return Err(ArtifactError::Expired);
        }
        let blobs = self.blobs.read().map_err(poisoned)?;
        blobs
            .get(&grant.key)
            .map(|held| held.object.clone())
            .ok_or(ArtifactError::Gone)
    }

    /// Drop a blob and every token pointing at it.
    pub fn remove(&self, owner: OwnerId, path: &str) -> Result<bool, ArtifactError> {
        let key = (owner, path.to_string());
        let removed = self.blobs.write().map_err(poisoned)?.remove(&key).is_some();
        self.grants.write().map_err(poisoned)?.retain(|_, g| g.key != key);
        Ok(removed)
    }
}

fn poisoned<E>(_: E) -> ArtifactError {
    ArtifactError::Storage(StorageError::Unavailable("ephemeral artifact lock poisoned".to_string()))
}

/// Places artifacts and (re)issues their download links.
#[derive(Clone)]
pub struct ArtifactStore {
    storage: Arc<dyn ObjectStorage>,
    ephemeral: Arc<EphemeralArtifacts>,
    bucket: String,
    url_ttl_seconds: u64,
    public_base_url: String,
}

impl ArtifactStore {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        ephemeral: Arc<EphemeralArtifacts>,
        bucket: impl Into<String>,
        url_ttl_seconds: u64,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            ephemeral,
            bucket: bucket.into(),
            url_ttl_seconds,
            public_base_url: public_base_url.into(),
        }
    }

    pub fn ephemeral(&self) -> &Arc<EphemeralArtifacts> {
        &self.ephemeral
    }

    pub fn url_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.url_ttl_seconds).unwrap_or(i64::MAX / 1_000))
    }

    /// Store an artifact. Never fails outright: if the upload or the URL
    /// signing fails the bytes are held in-process instead.
    pub async fn store(
        &self,
        owner: OwnerId,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredArtifact, ArtifactError> {
        let expires_at = now + self.url_ttl();

        match self.upload_and_sign(path, bytes.clone(), content_type).await {
            Ok(download_url) => Ok(StoredArtifact {
                storage: StorageKind::Persistent,
                download_url,
                expires_at,
            }),
            Err(err) => {
                warn!(%owner, path, error = %err, "object storage failed; holding artifact in memory");
                self.ephemeral.hold(
                    owner,
                    path,
                    StoredObject {
                        bytes,
                        content_type: content_type.to_string(),
                    },
                )?;
                let token = self.ephemeral.grant(owner, path, now, expires_at)?;
                Ok(StoredArtifact {
                    storage: StorageKind::Ephemeral,
                    download_url: self.ephemeral_url(&token),
                    expires_at,
                })
            }
        }
    }

    /// Issue a fresh link for an artifact stored earlier.
    pub async fn reissue(
        &self,
        owner: OwnerId,
        storage: StorageKind,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredArtifact, ArtifactError> {
        let expires_at = now + self.url_ttl();
        let download_url = match storage {
            StorageKind::Persistent => {
                self.storage
                    .create_signed_url(&self.bucket, path, self.url_ttl_seconds)
                    .await?
            }
            StorageKind::Ephemeral => {
                let token = self.ephemeral.grant(owner, path, now, expires_at)?;
                self.ephemeral_url(&token)
            }
        };
        Ok(StoredArtifact {
            storage,
            download_url,
            expires_at,
        })
    }

    /// Release in-process bytes. Durable objects are left in place.
    pub fn discard(&self, owner: OwnerId, storage: StorageKind, path: &str) -> Result<(), ArtifactError> {
        if storage == StorageKind::Ephemeral {
            self.ephemeral.remove(owner, path)?;
        }
        Ok(())
    }

    async fn upload_and_sign(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.storage
            .upload(&self.bucket, path, bytes, content_type)
            .await?;
        self.storage
            .create_signed_url(&self.bucket, path, self.url_ttl_seconds)
            .await
    }

    fn ephemeral_url(&self, token: &str) -> String {
        format!("{}/artifacts/{token}", self.public_base_url)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::exports::storage::LocalObjectStorage;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Object storage that always fails.
    pub(crate) struct DownStorage;

    #[async_trait]
    impl ObjectStorage for DownStorage {
        async fn upload(&self, _: &str, _: &str, _: Vec<u8>, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("bucket offline".to_string()))
        }

        async fn create_signed_url(&self, _: &str, _: &str, _: u64) -> Result<String, StorageError> {
            Err(StorageError::Unavailable("bucket offline".to_string()))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn store_with(storage: Arc<dyn ObjectStorage>) -> ArtifactStore {
        ArtifactStore::new(storage, Arc::new(EphemeralArtifacts::new()), "exports", 86_400, "http://svc.test")
    }

    #[tokio::test]
    async fn durable_upload_yields_signed_url() {
        let storage = Arc::new(LocalObjectStorage::new("k", "http://svc.test", Arc::new(SystemClock)));
        let store = store_with(storage);
        let owner = OwnerId::new();

        let stored = store.store(owner, "o/a.csv", b"a".to_vec(), "text/csv", t0()).await.unwrap();
        assert_eq!(stored.storage, StorageKind::Persistent);
        assert!(stored.download_url.contains("/storage/exports/o/a.csv?"));
        assert_eq!(stored.expires_at, t0() + Duration::hours(24));
    }

    #[tokio::test]
    async fn storage_failure_falls_back_to_memory() {
        let store = store_with(Arc::new(DownStorage));
        let owner = OwnerId::new();

        let stored = store.store(owner, "o/a.csv", b"a,b".to_vec(), "text/csv", t0()).await.unwrap();
        assert_eq!(stored.storage, StorageKind::Ephemeral);
        let token = stored.download_url.rsplit('/').next().unwrap();

        let object = store.ephemeral().fetch(owner, token, t0()).unwrap();
        assert_eq!(object.bytes, b"a,b");
        assert_eq!(
            store.ephemeral().fetch(OwnerId::new(), token, t0()),
            Err(ArtifactError::Gone)
        );
        assert_eq!(
            store.ephemeral().fetch(owner, token, t0() + Duration::hours(24)),
            Err(ArtifactError::Expired)
        );
    }

    #[tokio::test]
    async fn reissue_of_discarded_blob_is_gone() {
        let store = store_with(Arc::new(DownStorage));
        let owner = OwnerId::new();
        let stored = store.store(owner, "o/a.csv", vec![1], "text/csv", t0()).await.unwrap();
        let token = stored.download_url.rsplit('/').next().unwrap().to_string();

        let again = store.reissue(owner, StorageKind::Ephemeral, "o/a.csv", t0()).await.unwrap();
        assert_ne!(again.download_url, stored.download_url);

        assert_eq!(store.ephemeral().fetch(owner, &token, t0()), Err(ArtifactError::Gone));
        assert_eq!(store.ephemeral().grant_count(), 1);

        store.discard(owner, StorageKind::Ephemeral, "o/a.csv").unwrap();
        assert_eq!(store.ephemeral().fetch(owner, &token, t0()), Err(ArtifactError::Gone));
        assert_eq!(
            store.reissue(owner, StorageKind::Ephemeral, "o/a.csv", t0()).await,
            Err(ArtifactError::Gone)
        );
    }

    #[tokio::test]
    async fn repeated_reissues_keep_one_live_token() {
        let store = ArtifactStore::new(
            Arc::new(DownStorage),
            Arc::new(EphemeralArtifacts::new()),
            "exports",
            60,
            "http://svc.test",
        );
        let owner = OwnerId::new();
        store.store(owner, "o/a.csv", vec![1], "text/csv", t0()).await.unwrap();
        store.store(owner, "o/b.csv", vec![2], "text/csv", t0()).await.unwrap();

        let mut now = t0();
        for _ in 0..1_000 {
            now += Duration::seconds(61);
            store.reissue(owner, StorageKind::Ephemeral, "o/a.csv", now).await.unwrap();
        }

        // b's token has expired and was swept; a keeps only its newest.
        assert_eq!(store.ephemeral().grant_count(), 1);
    }
}
