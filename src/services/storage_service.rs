/*
 * Storage facade: persists generated images as blob + metadata + cache entry, and builds the public URL surface.
 * Partial failure semantics are deliberate: a blob put failure surfaces before any insert, and an insert failure
 * after a successful put leaves an orphaned blob for the cleanup cycle to reconcile.
 */

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{error, info};

use crate::database::meta_store::SharedMetaStore;
use crate::models::{ImageFormat, ImageRecord, SaveImageOptions};
use crate::services::blob_store::{BlobObject, PutOptions, SharedBlobStore};
use crate::services::cache_service::CacheService;
use crate::utils::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3_600;

/// Storage facade wiring blob store, metadata store, and cache
#[derive(Clone)]
pub struct StorageService {
    blob_store: SharedBlobStore,
    meta_store: SharedMetaStore,
    cache: CacheService,
    public_base_url: String,
    signing_secret: String,
}

impl StorageService {
    pub fn new(
        blob_store: SharedBlobStore,
        meta_store: SharedMetaStore,
        cache: CacheService,
        public_base_url: String,
        signing_secret: String,
    ) -> Self {
        Self {
            blob_store,
            meta_store,
            cache,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signing_secret,
        }
    }

    /// The cache handle shared with this facade
    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    /// The authoritative metadata store handle
    pub fn meta_store(&self) -> &SharedMetaStore {
        &self.meta_store
    }

    /// Generate an image id: `{unixMillis}-{hash8}`.
    /// Deterministic within one millisecond for identical inputs; distinct
    /// inputs in the same millisecond diverge through the fingerprint.
    pub fn generate_image_id(
        user_id: Option<&str>,
        verse_reference: &str,
        style: &str,
        unix_millis: i64,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}|{}|{}|{}",
                user_id.unwrap_or("anonymous"),
                verse_reference,
                style,
                unix_millis
            )
            .as_bytes(),
        );
        let digest = hasher.finalize();
        let hash8: String = digest
            .iter()
            .take(4)
            .map(|b| format!("{:02x}", b))
            .collect();
        format!("{}-{}", unix_millis, hash8)
    }

    fn blob_key_for(image_id: &str, format: ImageFormat, at: DateTime<Utc>) -> String {
        format!(
            "images/{}/{}.{}",
            at.format("%Y/%m"),
            image_id,
            format.extension()
        )
    }

    /// Persist a generated image: blob put, metadata insert, cache populate.
    pub async fn save_image(&self, bytes: &[u8], options: SaveImageOptions) -> Result<ImageRecord> {
        let now = Utc::now();
        let image_id = match &options.requested_id {
            Some(requested) => requested.clone(),
            None => Self::generate_image_id(
                options.user_id.as_deref(),
                &options.verse_reference,
                options.style_preset.as_str(),
                now.timestamp_millis(),
            ),
        };

        let format = ImageFormat::from_magic_bytes(bytes);
        let blob_key = Self::blob_key_for(&image_id, format, options.generated_at);

        let mut custom_metadata = HashMap::new();
        custom_metadata.insert("imageId".to_string(), image_id.clone());
        custom_metadata.insert(
            "verseReference".to_string(),
            options.verse_reference.clone(),
        );
        custom_metadata.insert(
            "userId".to_string(),
            options
                .user_id
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()),
        );

        self.blob_store
            .put(
                &blob_key,
                bytes,
                PutOptions {
                    content_type: format.content_type().to_string(),
                    custom_metadata,
                },
            )
            .await?;

        let record = ImageRecord {
            id: image_id.clone(),
            user_id: options.user_id,
            verse_reference: options.verse_reference,
            verse_text: options.verse_text,
            prompt: options.prompt,
            style_preset: options.style_preset,
            blob_key: Some(blob_key.clone()),
            file_size: bytes.len() as i64,
            format,
            width: options.width,
            height: options.height,
            tags: options.tags,
            moderation_status: options.moderation_status,
            generated_at: options.generated_at,
            created_at: now,
        };

        if let Err(e) = self.meta_store.insert_image(&record).await {
            // The blob stays behind as an orphan; the cleanup cycle reconciles.
            error!(
                image_id = %image_id,
                blob_key = %blob_key,
                "Metadata insert failed after blob put, orphaned blob left for cleanup: {}",
                e
            );
            return Err(e);
        }

        self.cache.set_metadata(&record).await;

        info!(
            image_id = %image_id,
            blob_key = %blob_key,
            size_bytes = bytes.len(),
            format = %format,
            "Image saved"
        );

        Ok(record)
    }

    /// Fetch metadata and image bytes
    pub async fn get_image(&self, image_id: &str) -> Result<(ImageRecord, Vec<u8>)> {
        let (record, blob) = self.get_image_with_metadata(image_id).await?;
        Ok((record, blob.bytes))
    }

    /// Fetch metadata plus the full blob response so the API layer can build
    /// conditional responses from the etag and upload timestamp.
    pub async fn get_image_with_metadata(
        &self,
        image_id: &str,
    ) -> Result<(ImageRecord, BlobObject)> {
        let record = self
            .cache
            .get_metadata(image_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;

        let blob_key = record
            .blob_key
            .clone()
            .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;

        let blob = self
            .blob_store
            .get(&blob_key)
            .await?
            .ok_or_else(|| {
                AppError::StorageReadFailed(format!(
                    "blob missing for image {} at {}",
                    image_id, blob_key
                ))
            })?;

        Ok((record, blob))
    }

    /// Metadata-only lookup through the cache
    pub async fn get_metadata(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        self.cache.get_metadata(image_id).await
    }

    /// Build the public (optionally signed) URL for an image
    pub async fn get_image_url(
        &self,
        image_id: &str,
        signed: bool,
        expires_in_secs: Option<u64>,
    ) -> Result<String> {
        let record = self
            .cache
            .get_metadata(image_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;

        let blob_key = record
            .blob_key
            .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;

        let base = format!("{}/{}", self.public_base_url, blob_key);
        if !signed {
            return Ok(base);
        }

        let expires =
            Utc::now().timestamp() + expires_in_secs.unwrap_or(DEFAULT_SIGNED_URL_TTL_SECS) as i64;
        let signature = self.sign(&blob_key, expires)?;
        Ok(format!(
            "{}?expires={}&signature={}",
            base, expires, signature
        ))
    }

    /// HMAC signature bound to both the blob path and the expiry
    fn sign(&self, blob_key: &str, expires: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .map_err(|e| AppError::internal(format!("signing key rejected: {}", e)))?;
        mac.update(format!("{}|{}", blob_key, expires).as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Verify a signature produced by a symmetric peer
    pub fn verify_signature(&self, blob_key: &str, expires: i64, signature: &str) -> bool {
        match self.sign(blob_key, expires) {
            Ok(expected) => {
                // Constant-time comparison.
                expected.len() == signature.len()
                    && expected
                        .bytes()
                        .zip(signature.bytes())
                        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                        == 0
            }
            Err(_) => false,
        }
    }

    /// Immutable cache headers for the binary data endpoint
    pub fn generate_cache_headers(blob: &BlobObject) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=31536000, immutable"),
        );
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", blob.etag)) {
            headers.insert(header::ETAG, value);
        }
        if let Ok(value) = HeaderValue::from_str(&blob.content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        let last_modified = blob.uploaded.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&last_modified) {
            headers.insert(header::LAST_MODIFIED, value);
        }
        headers
    }

    /// If-None-Match handling: `*` matches anything, otherwise the etag must
    /// appear exactly, quoted or unquoted.
    pub fn check_etag_match(if_none_match: Option<&str>, etag: &str) -> bool {
        let Some(header_value) = if_none_match else {
            return false;
        };

        header_value.split(',').map(str::trim).any(|candidate| {
            candidate == "*"
                || candidate == etag
                || candidate.trim_matches('"') == etag
                || candidate
                    .strip_prefix("W/")
                    .map(|weak| weak.trim_matches('"') == etag)
                    .unwrap_or(false)
        })
    }

    /// Remove both the blob and the metadata row; a missing blob is ignored.
    pub async fn delete_image(&self, image_id: &str) -> Result<()> {
        let record = self.meta_store.get_image(image_id).await?;

        if let Some(record) = record {
            if let Some(blob_key) = &record.blob_key {
                self.blob_store.delete(blob_key).await?;
            }
            self.meta_store.delete_image(image_id).await?;
            self.cache.invalidate_image(image_id).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryMetaStore;
    use crate::models::{ModerationStatus, StylePreset};
    use crate::services::blob_store::{BlobStore, MemoryBlobStore};
    use crate::services::cache_service::MemoryCache;
    use std::sync::Arc;

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn storage() -> (StorageService, SharedMetaStore, Arc<MemoryBlobStore>) {
        let meta: SharedMetaStore = Arc::new(MemoryMetaStore::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let cache = CacheService::new(Arc::new(MemoryCache::new()), meta.clone());
        let service = StorageService::new(
            blob.clone(),
            meta.clone(),
            cache,
            "https://images.example.com".to_string(),
            "test-signing-secret".to_string(),
        );
        (service, meta, blob)
    }

    fn options(requested_id: Option<&str>) -> SaveImageOptions {
        SaveImageOptions {
            user_id: Some("user-1".to_string()),
            verse_reference: "John 3:16".to_string(),
            verse_text: "For God so loved the world".to_string(),
            prompt: "a prompt".to_string(),
            style_preset: StylePreset::Modern,
            width: 1024,
            height: 1024,
            tags: vec![],
            moderation_status: ModerationStatus::Approved,
            requested_id: requested_id.map(|s| s.to_string()),
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_round_trip() {
        let (storage, _, _) = storage();
        let record = storage.save_image(&PNG_MAGIC, options(None)).await.unwrap();

        assert_eq!(record.format, ImageFormat::Png);
        assert!(record
            .blob_key
            .as_ref()
            .unwrap()
            .starts_with("images/"));
        assert!(record.blob_key.as_ref().unwrap().ends_with(".png"));

        let (fetched, bytes) = storage.get_image(&record.id).await.unwrap();
        assert_eq!(bytes, PNG_MAGIC);
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_blob_carries_custom_metadata() {
        let (storage, _, blob) = storage();
        let record = storage.save_image(&PNG_MAGIC, options(None)).await.unwrap();

        let object = blob
            .get(record.blob_key.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.custom_metadata.get("imageId").unwrap(), &record.id);
        assert_eq!(
            object.custom_metadata.get("verseReference").unwrap(),
            "John 3:16"
        );
        assert_eq!(object.custom_metadata.get("userId").unwrap(), "user-1");
    }

    #[test]
    fn test_id_generation_distinguishes_inputs() {
        let millis = 1_700_000_000_000;
        let first = StorageService::generate_image_id(Some("a"), "John 3:16", "modern", millis);
        let second = StorageService::generate_image_id(Some("b"), "John 3:16", "modern", millis);
        let third = StorageService::generate_image_id(Some("a"), "John 3:16", "modern", millis + 1);

        assert_ne!(first, second);
        assert_ne!(first, third);
        // Identical inputs in the same millisecond are deterministic.
        assert_eq!(
            first,
            StorageService::generate_image_id(Some("a"), "John 3:16", "modern", millis)
        );
        assert!(first.starts_with(&format!("{}-", millis)));
        let suffix = first.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }

    #[tokio::test]
    async fn test_signed_url_binding() {
        let (storage, _, _) = storage();
        let record = storage
            .save_image(&PNG_MAGIC, options(Some("fixed-id")))
            .await
            .unwrap();

        let url = storage
            .get_image_url(&record.id, true, Some(600))
            .await
            .unwrap();

        assert!(url.starts_with("https://images.example.com/images/"));
        let query = url.split('?').nth(1).unwrap();
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = Some(v.parse::<i64>().unwrap()),
                Some(("signature", v)) => signature = Some(v.to_string()),
                _ => {}
            }
        }

        let expires = expires.unwrap();
        let signature = signature.unwrap();
        assert!(expires > Utc::now().timestamp());

        let blob_key = record.blob_key.unwrap();
        assert!(storage.verify_signature(&blob_key, expires, &signature));
        // Tampering with either the path or the expiry invalidates it.
        assert!(!storage.verify_signature(&blob_key, expires + 1, &signature));
        assert!(!storage.verify_signature("images/other.png", expires, &signature));
    }

    #[tokio::test]
    async fn test_unsigned_url_shape() {
        let (storage, _, _) = storage();
        let record = storage.save_image(&PNG_MAGIC, options(None)).await.unwrap();
        let url = storage.get_image_url(&record.id, false, None).await.unwrap();
        assert_eq!(
            url,
            format!(
                "https://images.example.com/{}",
                record.blob_key.unwrap()
            )
        );
    }

    #[test]
    fn test_etag_matching() {
        assert!(StorageService::check_etag_match(Some("*"), "abc"));
        assert!(StorageService::check_etag_match(Some("abc"), "abc"));
        assert!(StorageService::check_etag_match(Some("\"abc\""), "abc"));
        assert!(StorageService::check_etag_match(
            Some("\"xyz\", \"abc\""),
            "abc"
        ));
        assert!(StorageService::check_etag_match(Some("W/\"abc\""), "abc"));
        assert!(!StorageService::check_etag_match(Some("\"xyz\""), "abc"));
        assert!(!StorageService::check_etag_match(None, "abc"));
    }

    #[tokio::test]
    async fn test_delete_removes_both_sides() {
        let (storage, meta, blob) = storage();
        let record = storage.save_image(&PNG_MAGIC, options(None)).await.unwrap();
        let blob_key = record.blob_key.clone().unwrap();

        storage.delete_image(&record.id).await.unwrap();

        assert!(meta.get_image(&record.id).await.unwrap().is_none());
        assert!(blob.get(&blob_key).await.unwrap().is_none());
        // Deleting again is a no-op.
        storage.delete_image(&record.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_failure_leaves_orphan_blob() {
        let (storage, meta, blob) = storage();
        storage
            .save_image(&PNG_MAGIC, options(Some("dup-id")))
            .await
            .unwrap();

        // Second save with the same pinned id: the blob put succeeds, the
        // metadata insert collides, and the caller sees the error.
        let err = storage
            .save_image(&PNG_MAGIC, options(Some("dup-id")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "database_query_failed");

        // The original row is intact and the orphaned blob is still present.
        assert!(meta.get_image("dup-id").await.unwrap().is_some());
        assert!(!blob.list("images/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_headers() {
        let (storage, _, blob) = storage();
        let record = storage.save_image(&PNG_MAGIC, options(None)).await.unwrap();
        let object = blob
            .get(record.blob_key.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();

        let headers = StorageService::generate_cache_headers(&object);
        assert_eq!(
            headers.get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=31536000, immutable"
        );
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(headers.get(header::VARY).unwrap(), "Accept-Encoding");
        assert!(headers.get(header::ETAG).is_some());
        assert!(headers.get(header::LAST_MODIFIED).is_some());
    }
}
