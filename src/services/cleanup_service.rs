/*
 * Aged-content cleanup: candidate identification, pre-deletion backup, paired blob+row deletes, and backup pruning.
 * The backup step must succeed before any delete is attempted; per-image failures accumulate without aborting the pass.
 */

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::meta_store::SharedMetaStore;
use crate::models::ImageRecord;
use crate::services::blob_store::{PutOptions, SharedBlobStore};
use crate::services::cache_service::CacheService;
use crate::utils::error::Result;

pub const BACKUP_PREFIX: &str = "backups/";
const BACKUP_VERSION: &str = "1.0";

/// Tags exempting an image from cleanup regardless of age
pub const DEFAULT_PROTECTED_TAGS: &[&str] = &["daily-verse", "favorite"];

/// Aged rows partitioned by protection
#[derive(Debug, Clone)]
pub struct CleanupCandidates {
    pub eligible: Vec<ImageRecord>,
    pub protected: Vec<ImageRecord>,
}

/// Snapshot manifest written to the blob store before deletion
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupManifest {
    #[serde(rename = "backupId")]
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    #[serde(rename = "recordCount")]
    pub record_count: usize,
    pub records: Vec<ImageRecord>,
}

/// Result of a backup write
#[derive(Debug, Clone)]
pub struct BackupResult {
    pub backup_id: String,
    pub key: String,
    pub record_count: usize,
    pub size_bytes: usize,
}

/// Result of the delete pass
#[derive(Debug, Clone, Default)]
pub struct CleanupOutcome {
    pub deleted_image_ids: Vec<String>,
    pub failed_image_ids: Vec<String>,
    pub dry_run: bool,
}

/// Everything one cleanup cycle produced
#[derive(Debug)]
pub struct CleanupCycleReport {
    pub candidates: CleanupCandidates,
    pub backup: BackupResult,
    pub outcome: CleanupOutcome,
    pub pruned_backups: usize,
}

/// Cleanup orchestration over the metadata store and the blob store
#[derive(Clone)]
pub struct CleanupService {
    meta_store: SharedMetaStore,
    blob_store: SharedBlobStore,
    cache: CacheService,
    image_retention_days: i64,
    backup_retention_days: i64,
    protected_tags: Vec<String>,
    dry_run: bool,
}

impl CleanupService {
    pub fn new(
        meta_store: SharedMetaStore,
        blob_store: SharedBlobStore,
        cache: CacheService,
        image_retention_days: i64,
        backup_retention_days: i64,
    ) -> Self {
        Self {
            meta_store,
            blob_store,
            cache,
            image_retention_days,
            backup_retention_days,
            protected_tags: DEFAULT_PROTECTED_TAGS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn is_protected(&self, record: &ImageRecord) -> bool {
        record
            .tags
            .iter()
            .any(|tag| self.protected_tags.iter().any(|p| p == tag))
    }

    /// Partition rows past the retention threshold into eligible and protected
    pub async fn identify_cleanup_candidates(&self) -> Result<CleanupCandidates> {
        let cutoff = Utc::now() - Duration::days(self.image_retention_days);
        let aged = self.meta_store.list_images_generated_before(cutoff).await?;

        let (protected, eligible): (Vec<ImageRecord>, Vec<ImageRecord>) =
            aged.into_iter().partition(|record| self.is_protected(record));

        info!(
            eligible = eligible.len(),
            protected = protected.len(),
            "Identified cleanup candidates"
        );

        Ok(CleanupCandidates {
            eligible,
            protected,
        })
    }

    /// Serialise all current image rows into a snapshot blob
    pub async fn create_backup(&self) -> Result<BackupResult> {
        let records = self.meta_store.list_all_images().await?;
        let backup_id = Uuid::new_v4().to_string();
        let manifest = BackupManifest {
            backup_id: backup_id.clone(),
            timestamp: Utc::now(),
            version: BACKUP_VERSION.to_string(),
            record_count: records.len(),
            records,
        };

        let payload = serde_json::to_vec(&manifest)?;
        let key = format!("{}d1-{}.json", BACKUP_PREFIX, backup_id);

        self.blob_store
            .put(
                &key,
                &payload,
                PutOptions {
                    content_type: "application/json".to_string(),
                    custom_metadata: Default::default(),
                },
            )
            .await?;

        info!(
            backup_id = %backup_id,
            record_count = manifest.record_count,
            size_bytes = payload.len(),
            "Backup written"
        );

        Ok(BackupResult {
            backup_id,
            key,
            record_count: manifest.record_count,
            size_bytes: payload.len(),
        })
    }

    /// Delete each image's blob and row; failures accumulate without aborting
    pub async fn execute_cleanup(&self, image_ids: &[String]) -> Result<CleanupOutcome> {
        let mut outcome = CleanupOutcome {
            dry_run: self.dry_run,
            ..CleanupOutcome::default()
        };

        if self.dry_run {
            info!(
                count = image_ids.len(),
                "Dry run: would delete {:?}", image_ids
            );
            return Ok(outcome);
        }

        for image_id in image_ids {
            let result: Result<()> = async {
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
            .await;

            match result {
                Ok(()) => outcome.deleted_image_ids.push(image_id.clone()),
                Err(e) => {
                    warn!("Cleanup failed for {}: {}", image_id, e);
                    outcome.failed_image_ids.push(image_id.clone());
                }
            }
        }

        info!(
            deleted = outcome.deleted_image_ids.len(),
            failed = outcome.failed_image_ids.len(),
            "Cleanup pass completed"
        );

        Ok(outcome)
    }

    /// Delete backup objects older than the backup retention window
    pub async fn manage_backup_retention(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.backup_retention_days);
        let backups = self.blob_store.list(BACKUP_PREFIX).await?;

        let mut pruned = 0;
        for backup in backups {
            if backup.uploaded < cutoff {
                match self.blob_store.delete(&backup.key).await {
                    Ok(()) => pruned += 1,
                    Err(e) => warn!("Failed to prune backup {}: {}", backup.key, e),
                }
            }
        }

        if pruned > 0 {
            info!(pruned, "Pruned aged backups");
        }
        Ok(pruned)
    }

    /// Full cycle: identify, backup, execute, prune.
    /// The backup write must succeed before any delete is attempted.
    pub async fn perform_cleanup_cycle(&self) -> Result<CleanupCycleReport> {
        let candidates = self.identify_cleanup_candidates().await?;
        let backup = self.create_backup().await?;

        let eligible_ids: Vec<String> = candidates
            .eligible
            .iter()
            .map(|record| record.id.clone())
            .collect();
        let outcome = self.execute_cleanup(&eligible_ids).await?;
        let pruned_backups = self.manage_backup_retention().await?;

        Ok(CleanupCycleReport {
            candidates,
            backup,
            outcome,
            pruned_backups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryMetaStore;
    use crate::models::{ImageFormat, ModerationStatus, StylePreset};
    use crate::services::blob_store::{BlobStore, MemoryBlobStore};
    use crate::services::cache_service::{CacheService, MemoryCache};
    use std::sync::Arc;

    fn service(
        image_days: i64,
        backup_days: i64,
    ) -> (CleanupService, SharedMetaStore, Arc<MemoryBlobStore>) {
        let meta: SharedMetaStore = Arc::new(MemoryMetaStore::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let cache = CacheService::new(Arc::new(MemoryCache::new()), meta.clone());
        let service = CleanupService::new(
            meta.clone(),
            blob.clone(),
            cache,
            image_days,
            backup_days,
        );
        (service, meta, blob)
    }

    async fn seed_image(
        meta: &SharedMetaStore,
        blob: &Arc<MemoryBlobStore>,
        id: &str,
        age_days: i64,
        tags: Vec<&str>,
    ) {
        let blob_key = format!("images/2026/01/{}.webp", id);
        blob.put(&blob_key, b"bytes", PutOptions::default())
            .await
            .unwrap();
        meta.insert_image(&ImageRecord {
            id: id.to_string(),
            user_id: None,
            verse_reference: "John 3:16".to_string(),
            verse_text: "text".to_string(),
            prompt: "prompt".to_string(),
            style_preset: StylePreset::Modern,
            blob_key: Some(blob_key),
            file_size: 5,
            format: ImageFormat::Webp,
            width: 1024,
            height: 1024,
            tags: tags.into_iter().map(|t| t.to_string()).collect(),
            moderation_status: ModerationStatus::Approved,
            generated_at: Utc::now() - Duration::days(age_days),
            created_at: Utc::now() - Duration::days(age_days),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_protected_tags_never_eligible() {
        let (service, meta, blob) = service(30, 30);
        seed_image(&meta, &blob, "old-plain", 60, vec![]).await;
        seed_image(&meta, &blob, "old-daily", 60, vec!["daily-verse"]).await;
        seed_image(&meta, &blob, "old-favorite", 60, vec!["favorite", "sunset"]).await;
        seed_image(&meta, &blob, "fresh", 1, vec![]).await;

        let candidates = service.identify_cleanup_candidates().await.unwrap();

        let eligible_ids: Vec<&str> = candidates
            .eligible
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(eligible_ids, vec!["old-plain"]);
        assert_eq!(candidates.protected.len(), 2);
    }

    #[tokio::test]
    async fn test_execute_cleanup_removes_both_sides() {
        let (service, meta, blob) = service(30, 30);
        seed_image(&meta, &blob, "doomed", 60, vec![]).await;

        let outcome = service
            .execute_cleanup(&["doomed".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome.deleted_image_ids, vec!["doomed"]);
        assert!(outcome.failed_image_ids.is_empty());
        assert!(meta.get_image("doomed").await.unwrap().is_none());
        assert!(blob
            .get("images/2026/01/doomed.webp")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let (service, meta, blob) = service(30, 30);
        seed_image(&meta, &blob, "spared", 60, vec![]).await;

        let outcome = service
            .with_dry_run(true)
            .execute_cleanup(&["spared".to_string()])
            .await
            .unwrap();

        assert!(outcome.dry_run);
        assert!(outcome.deleted_image_ids.is_empty());
        assert!(meta.get_image("spared").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backup_manifest_shape() {
        let (service, meta, blob) = service(30, 30);
        seed_image(&meta, &blob, "kept", 5, vec![]).await;

        let backup = service.create_backup().await.unwrap();
        assert!(backup.key.starts_with("backups/d1-"));
        assert!(backup.key.ends_with(".json"));
        assert_eq!(backup.record_count, 1);

        let object = blob.get(&backup.key).await.unwrap().unwrap();
        assert_eq!(object.content_type, "application/json");
        let manifest: BackupManifest = serde_json::from_slice(&object.bytes).unwrap();
        assert_eq!(manifest.version, "1.0");
        assert_eq!(manifest.record_count, 1);
        assert_eq!(manifest.records[0].id, "kept");
    }

    #[tokio::test]
    async fn test_cycle_backs_up_before_deleting() {
        let (service, meta, blob) = service(30, 30);
        seed_image(&meta, &blob, "cycled", 60, vec![]).await;

        let report = service.perform_cleanup_cycle().await.unwrap();

        assert_eq!(report.outcome.deleted_image_ids, vec!["cycled"]);
        // The backup was written before the delete, so it still lists the row.
        let object = blob.get(&report.backup.key).await.unwrap().unwrap();
        let manifest: BackupManifest = serde_json::from_slice(&object.bytes).unwrap();
        assert!(manifest.records.iter().any(|r| r.id == "cycled"));
        assert!(meta.get_image("cycled").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backup_retention_prunes_aged_objects() {
        let (service, _, blob) = service(30, 7);
        blob.put("backups/d1-old.json", b"{}", PutOptions::default())
            .await
            .unwrap();
        blob.set_uploaded("backups/d1-old.json", Utc::now() - Duration::days(30))
            .await;
        blob.put("backups/d1-new.json", b"{}", PutOptions::default())
            .await
            .unwrap();

        let pruned = service.manage_backup_retention().await.unwrap();
        assert_eq!(pruned, 1);
        assert!(blob.get("backups/d1-old.json").await.unwrap().is_none());
        assert!(blob.get("backups/d1-new.json").await.unwrap().is_some());
    }
}
