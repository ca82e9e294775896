/*
 * Content moderation: the pre-persistence safety gate and the manual review queue.
 * The gate is a deterministic pattern check today; the interface is shaped so a model-backed check can be swapped in without touching callers.
 */

use chrono::Utc;
use tracing::{info, warn};

use crate::database::meta_store::SharedMetaStore;
use crate::models::{ModerationDecision, ModerationQueueEntry, ModerationStatus};
use crate::services::blob_store::SharedBlobStore;
use crate::services::cache_service::CacheService;
use crate::utils::error::{AppError, Result};

/// Fixed concerning-pattern list scanned over prompt + verse text.
/// Substring match on lowercased input keeps the decision deterministic.
const CONCERNING_PATTERNS: &[&str] = &[
    "gore",
    "graphic violence",
    "nudity",
    "self-harm",
    "hate symbol",
    "torture",
    "mutilat",
    "beheading",
];

/// Text metadata accompanying the generated bytes through the gate
#[derive(Debug, Clone)]
pub struct ContentMetadata {
    pub prompt: String,
    pub verse_text: String,
}

/// Gate verdict for a generated image
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyVerdict {
    pub should_store: bool,
    pub moderation_status: ModerationStatus,
    pub flag_reason: Option<String>,
}

/// Moderation service: safety gate plus review queue operations
#[derive(Clone)]
pub struct ModerationService {
    meta_store: SharedMetaStore,
    blob_store: SharedBlobStore,
    cache: CacheService,
    enabled: bool,
}

impl ModerationService {
    pub fn new(
        meta_store: SharedMetaStore,
        blob_store: SharedBlobStore,
        cache: CacheService,
        enabled: bool,
    ) -> Self {
        Self {
            meta_store,
            blob_store,
            cache,
            enabled,
        }
    }

    /// Deterministic safety check over the image and its text metadata.
    /// Identical (bytes, metadata) always yields the same decision.
    pub fn check_content_safety(&self, _bytes: &[u8], metadata: &ContentMetadata) -> SafetyVerdict {
        let haystack = format!("{} {}", metadata.prompt, metadata.verse_text).to_lowercase();

        for pattern in CONCERNING_PATTERNS {
            if haystack.contains(pattern) {
                return SafetyVerdict {
                    should_store: false,
                    moderation_status: ModerationStatus::Rejected,
                    flag_reason: Some(format!("matched concerning pattern '{}'", pattern)),
                };
            }
        }

        SafetyVerdict {
            should_store: true,
            moderation_status: ModerationStatus::Approved,
            flag_reason: None,
        }
    }

    /// Gate a new generation right before persistence
    pub fn should_store(&self, bytes: &[u8], metadata: &ContentMetadata) -> SafetyVerdict {
        if !self.enabled {
            return SafetyVerdict {
                should_store: true,
                moderation_status: ModerationStatus::Approved,
                flag_reason: None,
            };
        }

        self.check_content_safety(bytes, metadata)
    }

    /// Append a queue entry flagging an image for human review
    pub async fn flag_for_review(
        &self,
        image_id: &str,
        reason: &str,
    ) -> Result<ModerationQueueEntry> {
        let entry = self
            .meta_store
            .insert_moderation_entry(image_id, reason, Utc::now())
            .await?;
        info!(image_id = %image_id, queue_id = entry.id, "Image flagged for review");
        Ok(entry)
    }

    /// Oldest un-reviewed queue entries
    pub async fn get_pending_reviews(&self, limit: u32) -> Result<Vec<ModerationQueueEntry>> {
        self.meta_store.pending_reviews(limit).await
    }

    /// Apply a moderator decision: close the oldest open queue entry, update
    /// the image row, and drop the derived cache entries.
    pub async fn moderate_content(
        &self,
        image_id: &str,
        action: ModerationDecision,
        reviewer_id: Option<&str>,
    ) -> Result<()> {
        let record = self
            .meta_store
            .get_image(image_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;

        match action {
            ModerationDecision::Approve => {
                self.meta_store
                    .set_image_moderation(image_id, ModerationStatus::Approved, false)
                    .await?;
            }
            ModerationDecision::Reject => {
                // A rejected row must not reference a blob, so the object goes
                // first and the key is cleared with the status update.
                if let Some(blob_key) = &record.blob_key {
                    if let Err(e) = self.blob_store.delete(blob_key).await {
                        warn!("Failed to delete blob {} for rejected image: {}", blob_key, e);
                    }
                }
                self.meta_store
                    .set_image_moderation(image_id, ModerationStatus::Rejected, true)
                    .await?;
            }
        }

        let closed = self
            .meta_store
            .close_oldest_open_entry(image_id, reviewer_id, action, Utc::now())
            .await?;
        if !closed {
            info!(image_id = %image_id, "Moderation decision applied with no open queue entry");
        }

        self.cache.invalidate_image(image_id).await;

        info!(
            image_id = %image_id,
            action = action.as_str(),
            "Moderation decision propagated"
        );
        Ok(())
    }

    /// Current moderation status of an image
    pub async fn get_moderation_status(&self, image_id: &str) -> Result<ModerationStatus> {
        let record = self
            .meta_store
            .get_image(image_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("image {}", image_id)))?;
        Ok(record.moderation_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryMetaStore;
    use crate::models::{ImageFormat, ImageRecord, StylePreset};
    use crate::services::blob_store::{BlobStore, MemoryBlobStore, PutOptions};
    use crate::services::cache_service::MemoryCache;
    use std::sync::Arc;

    fn service(enabled: bool) -> (ModerationService, SharedMetaStore, Arc<MemoryBlobStore>) {
        let meta: SharedMetaStore = Arc::new(MemoryMetaStore::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let cache = CacheService::new(Arc::new(MemoryCache::new()), meta.clone());
        let service = ModerationService::new(meta.clone(), blob.clone(), cache, enabled);
        (service, meta, blob)
    }

    fn metadata(prompt: &str) -> ContentMetadata {
        ContentMetadata {
            prompt: prompt.to_string(),
            verse_text: "For God so loved the world".to_string(),
        }
    }

    async fn seed_image(meta: &SharedMetaStore, id: &str) -> ImageRecord {
        let record = ImageRecord {
            id: id.to_string(),
            user_id: None,
            verse_reference: "John 3:16".to_string(),
            verse_text: "For God so loved the world".to_string(),
            prompt: "prompt".to_string(),
            style_preset: StylePreset::Modern,
            blob_key: Some(format!("images/2026/08/{}.webp", id)),
            file_size: 10,
            format: ImageFormat::Webp,
            width: 1024,
            height: 1024,
            tags: vec![],
            moderation_status: ModerationStatus::Pending,
            generated_at: Utc::now(),
            created_at: Utc::now(),
        };
        meta.insert_image(&record).await.unwrap();
        record
    }

    #[test]
    fn test_disabled_gate_always_approves() {
        let (service, _, _) = service(false);
        let verdict = service.should_store(b"img", &metadata("a scene full of gore"));
        assert!(verdict.should_store);
        assert_eq!(verdict.moderation_status, ModerationStatus::Approved);
    }

    #[test]
    fn test_gate_rejects_concerning_patterns() {
        let (service, _, _) = service(true);
        let verdict = service.should_store(b"img", &metadata("a scene full of gore"));
        assert!(!verdict.should_store);
        assert_eq!(verdict.moderation_status, ModerationStatus::Rejected);
        assert!(verdict.flag_reason.unwrap().contains("gore"));
    }

    #[test]
    fn test_gate_is_deterministic() {
        let (service, _, _) = service(true);
        let meta = metadata("a peaceful landscape");
        let first = service.should_store(b"img", &meta);
        let second = service.should_store(b"img", &meta);
        assert_eq!(first, second);
        assert!(first.should_store);
    }

    #[tokio::test]
    async fn test_reject_clears_blob_and_key() {
        let (service, meta, blob) = service(true);
        let record = seed_image(&meta, "img-1").await;
        let blob_key = record.blob_key.clone().unwrap();
        blob.put(&blob_key, b"bytes", PutOptions::default())
            .await
            .unwrap();
        service.flag_for_review("img-1", "looks off").await.unwrap();

        service
            .moderate_content("img-1", ModerationDecision::Reject, Some("mod-1"))
            .await
            .unwrap();

        let after = meta.get_image("img-1").await.unwrap().unwrap();
        assert_eq!(after.moderation_status, ModerationStatus::Rejected);
        assert!(after.blob_key.is_none());
        assert!(blob.get(&blob_key).await.unwrap().is_none());

        let pending = service.get_pending_reviews(10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_approve_keeps_blob_key() {
        let (service, meta, _) = service(true);
        seed_image(&meta, "img-2").await;

        service
            .moderate_content("img-2", ModerationDecision::Approve, None)
            .await
            .unwrap();

        let after = meta.get_image("img-2").await.unwrap().unwrap();
        assert_eq!(after.moderation_status, ModerationStatus::Approved);
        assert!(after.blob_key.is_some());
    }

    #[tokio::test]
    async fn test_status_lookup_missing_image() {
        let (service, _, _) = service(true);
        let err = service.get_moderation_status("ghost").await.unwrap_err();
        assert_eq!(err.code(), "resource_not_found");
    }
}
