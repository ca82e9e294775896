/*
 * Blob store port with filesystem and in-memory adapters for opaque byte objects keyed by path.
 * Objects carry a content type, custom metadata, an etag derived from the bytes, and an upload timestamp so the HTTP layer can emit conditional responses.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::utils::error::{AppError, Result};

const WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// Compute the hex-encoded SHA-256 fingerprint used as the blob etag
pub fn compute_etag(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Options accompanying a put
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: String,
    pub custom_metadata: HashMap<String, String>,
}

/// A stored object with its bytes
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub etag: String,
    pub uploaded: DateTime<Utc>,
    pub custom_metadata: HashMap<String, String>,
}

/// Listing entry without the payload
#[derive(Debug, Clone)]
pub struct BlobObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub uploaded: DateTime<Utc>,
    pub content_type: String,
}

/// Port over the blob store
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], options: PutOptions) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<BlobObject>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObjectInfo>>;
}

pub type SharedBlobStore = Arc<dyn BlobStore>;

/// Sidecar metadata persisted next to each filesystem object
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SidecarMeta {
    content_type: String,
    etag: String,
    uploaded: DateTime<Utc>,
    custom_metadata: HashMap<String, String>,
}

/// Filesystem-backed blob store rooted at BLOB_ROOT
/// Keys map to relative paths; a `.meta.json` sidecar carries the object metadata.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        // Keys are service-generated, but reject traversal anyway.
        if key.split('/').any(|segment| segment == "..") || key.starts_with('/') {
            return Err(AppError::StorageWriteFailed(format!(
                "invalid blob key: {}",
                key
            )));
        }
        Ok(self.root.join(key))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(".meta.json");
        PathBuf::from(sidecar)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], options: PutOptions) -> Result<()> {
        let path = self.object_path(key)?;
        let sidecar = Self::sidecar_path(&path);
        let meta = SidecarMeta {
            content_type: options.content_type,
            etag: compute_etag(bytes),
            uploaded: Utc::now(),
            custom_metadata: options.custom_metadata,
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| AppError::StorageWriteFailed(format!("sidecar encode failed: {}", e)))?;

        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::StorageWriteFailed(format!("mkdir {} failed: {}", key, e))
                })?;
            }
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| AppError::StorageWriteFailed(format!("put {} failed: {}", key, e)))?;
            tokio::fs::write(&sidecar, &meta_json)
                .await
                .map_err(|e| AppError::StorageWriteFailed(format!("put {} failed: {}", key, e)))?;
            Ok(())
        };

        tokio::time::timeout(WRITE_DEADLINE, write)
            .await
            .map_err(|_| AppError::StorageWriteFailed(format!("put {} deadline exceeded", key)))?
    }

    async fn get(&self, key: &str) -> Result<Option<BlobObject>> {
        let path = self.object_path(key)?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::StorageReadFailed(format!(
                    "get {} failed: {}",
                    key, e
                )))
            }
        };

        let sidecar = Self::sidecar_path(&path);
        let meta: SidecarMeta = match tokio::fs::read(&sidecar).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                AppError::StorageReadFailed(format!("corrupt sidecar for {}: {}", key, e))
            })?,
            // An object without a sidecar still serves; metadata is rebuilt
            // from the bytes with a generic content type.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SidecarMeta {
                content_type: "application/octet-stream".to_string(),
                etag: compute_etag(&bytes),
                uploaded: Utc::now(),
                custom_metadata: HashMap::new(),
            },
            Err(e) => {
                return Err(AppError::StorageReadFailed(format!(
                    "get {} failed: {}",
                    key, e
                )))
            }
        };

        Ok(Some(BlobObject {
            key: key.to_string(),
            bytes,
            content_type: meta.content_type,
            etag: meta.etag,
            uploaded: meta.uploaded,
            custom_metadata: meta.custom_metadata,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::StorageWriteFailed(format!(
                    "delete {} failed: {}",
                    key, e
                )))
            }
        }

        let _ = tokio::fs::remove_file(Self::sidecar_path(&path)).await;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobObjectInfo>> {
        let mut results = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(AppError::StorageReadFailed(format!(
                        "list failed at {:?}: {}",
                        dir, e
                    )))
                }
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                AppError::StorageReadFailed(format!("list failed at {:?}: {}", dir, e))
            })? {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.to_string_lossy().ends_with(".meta.json") {
                    continue;
                }

                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }

                let bytes_len = entry
                    .metadata()
                    .await
                    .map(|m| m.len())
                    .unwrap_or_default();
                let sidecar = Self::sidecar_path(&path);
                let meta: Option<SidecarMeta> = match tokio::fs::read(&sidecar).await {
                    Ok(raw) => serde_json::from_slice(&raw).ok(),
                    Err(_) => None,
                };

                let (etag, uploaded, content_type) = match meta {
                    Some(meta) => (meta.etag, meta.uploaded, meta.content_type),
                    None => (
                        String::new(),
                        Utc::now(),
                        "application/octet-stream".to_string(),
                    ),
                };

                results.push(BlobObjectInfo {
                    key,
                    size: bytes_len,
                    etag,
                    uploaded,
                    content_type,
                });
            }
        }

        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }
}

/// In-memory blob store for the test-suite
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, BlobObject>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: rewrite an object's upload timestamp to simulate age
    pub async fn set_uploaded(&self, key: &str, uploaded: DateTime<Utc>) {
        if let Some(object) = self.objects.write().await.get_mut(key) {
            object.uploaded = uploaded;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], options: PutOptions) -> Result<()> {
        let object = BlobObject {
            key: key.to_string(),
            bytes: bytes.to_vec(),
            content_type: options.content_type,
            etag: compute_etag(bytes),
            uploaded: Utc::now(),
            custom_metadata: options.custom_metadata,
        };
        self.objects.write().await.insert(key.to_string(), object);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<BlobObject>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobObjectInfo>> {
        let objects = self.objects.read().await;
        let mut results: Vec<BlobObjectInfo> = objects
            .values()
            .filter(|object| object.key.starts_with(prefix))
            .map(|object| BlobObjectInfo {
                key: object.key.clone(),
                size: object.bytes.len() as u64,
                etag: object.etag.clone(),
                uploaded: object.uploaded,
                content_type: object.content_type.clone(),
            })
            .collect();
        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryBlobStore::new();
        let mut metadata = HashMap::new();
        metadata.insert("imageId".to_string(), "img-1".to_string());

        store
            .put(
                "images/2026/08/img-1.webp",
                b"payload",
                PutOptions {
                    content_type: "image/webp".to_string(),
                    custom_metadata: metadata,
                },
            )
            .await
            .unwrap();

        let object = store
            .get("images/2026/08/img-1.webp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.bytes, b"payload");
        assert_eq!(object.content_type, "image/webp");
        assert_eq!(object.etag, compute_etag(b"payload"));
        assert_eq!(object.custom_metadata.get("imageId").unwrap(), "img-1");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryBlobStore::new();
        store.delete("missing-key").await.unwrap();
        store
            .put("k", b"v", PutOptions::default())
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = MemoryBlobStore::new();
        store
            .put("backups/d1-a.json", b"{}", PutOptions::default())
            .await
            .unwrap();
        store
            .put("images/2026/08/x.webp", b"img", PutOptions::default())
            .await
            .unwrap();

        let backups = store.list("backups/").await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].key, "backups/d1-a.json");
    }

    #[test]
    fn test_etag_is_sha256_hex() {
        let etag = compute_etag(b"test data");
        assert_eq!(etag.len(), 64);
        assert!(etag.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
