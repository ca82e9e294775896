/*
 * In-memory MetaStore adapter backing the test-suite and local development.
 * Semantics mirror the PostgreSQL adapter, including rotation ordering and the oldest-open-entry close rule.
 */

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::database::meta_store::MetaStore;
use crate::models::{
    DailyMetric, ImageRecord, ModerationDecision, ModerationQueueEntry, ModerationStatus, Verse,
};
use crate::utils::error::{AppError, Result};

#[derive(Default)]
struct MemoryState {
    images: HashMap<String, ImageRecord>,
    verses: HashMap<String, Verse>,
    queue: Vec<ModerationQueueEntry>,
    next_queue_id: i64,
    metrics: HashMap<NaiveDate, DailyMetric>,
}

#[derive(Default)]
pub struct MemoryMetaStore {
    state: RwLock<MemoryState>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_queue_id: 1,
                ..MemoryState::default()
            }),
        }
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn insert_image(&self, record: &ImageRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.images.contains_key(&record.id) {
            return Err(AppError::DatabaseQueryFailed(format!(
                "duplicate image id {}",
                record.id
            )));
        }
        state.images.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_image(&self, id: &str) -> Result<Option<ImageRecord>> {
        Ok(self.state.read().await.images.get(id).cloned())
    }

    async fn set_image_moderation(
        &self,
        id: &str,
        status: ModerationStatus,
        clear_blob_key: bool,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .images
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("image {}", id)))?;
        record.moderation_status = status;
        if clear_blob_key {
            record.blob_key = None;
        }
        Ok(())
    }

    async fn delete_image(&self, id: &str) -> Result<()> {
        self.state.write().await.images.remove(id);
        Ok(())
    }

    async fn list_images_generated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ImageRecord>> {
        let state = self.state.read().await;
        let mut images: Vec<ImageRecord> = state
            .images
            .values()
            .filter(|record| record.generated_at < cutoff)
            .cloned()
            .collect();
        images.sort_by_key(|record| record.generated_at);
        Ok(images)
    }

    async fn list_all_images(&self) -> Result<Vec<ImageRecord>> {
        let state = self.state.read().await;
        let mut images: Vec<ImageRecord> = state.images.values().cloned().collect();
        images.sort_by_key(|record| record.created_at);
        Ok(images)
    }

    async fn get_verse(&self, book: &str, chapter: u32, verse: u32) -> Result<Option<Verse>> {
        let book_lower = book.to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .verses
            .values()
            .find(|v| {
                v.book.to_lowercase() == book_lower
                    && v.chapter == chapter as i32
                    && v.verse == verse as i32
            })
            .cloned())
    }

    async fn pick_rotation_verse(&self) -> Result<Option<Verse>> {
        let state = self.state.read().await;
        let mut verses: Vec<&Verse> = state.verses.values().collect();
        // last_used ASC NULLS FIRST, use_count ASC
        verses.sort_by(|a, b| match (a.last_used, b.last_used) {
            (None, None) => a.use_count.cmp(&b.use_count),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(left), Some(right)) => {
                left.cmp(&right).then(a.use_count.cmp(&b.use_count))
            }
        });
        Ok(verses.first().map(|v| (*v).clone()))
    }

    async fn touch_verse(&self, reference: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(verse) = state.verses.get_mut(reference) {
            verse.last_used = Some(now);
            verse.use_count += 1;
        }
        Ok(())
    }

    async fn search_verses(&self, query: &str, limit: u32) -> Result<Vec<Verse>> {
        let needle = query.to_lowercase();
        let state = self.state.read().await;
        let mut matches: Vec<Verse> = state
            .verses
            .values()
            .filter(|v| {
                v.reference.to_lowercase().contains(&needle)
                    || v.text.to_lowercase().contains(&needle)
                    || v.book.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.reference.cmp(&b.reference));
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn upsert_verse(&self, verse: &Verse) -> Result<()> {
        let mut state = self.state.write().await;
        state.verses.insert(verse.reference.clone(), verse.clone());
        Ok(())
    }

    async fn insert_moderation_entry(
        &self,
        image_id: &str,
        reason: &str,
        flagged_at: DateTime<Utc>,
    ) -> Result<ModerationQueueEntry> {
        let mut state = self.state.write().await;
        let entry = ModerationQueueEntry {
            id: state.next_queue_id,
            image_id: image_id.to_string(),
            flagged_reason: reason.to_string(),
            flagged_at,
            reviewed_at: None,
            reviewer_id: None,
            decision: None,
        };
        state.next_queue_id += 1;
        state.queue.push(entry.clone());
        Ok(entry)
    }

    async fn pending_reviews(&self, limit: u32) -> Result<Vec<ModerationQueueEntry>> {
        let state = self.state.read().await;
        let mut pending: Vec<ModerationQueueEntry> = state
            .queue
            .iter()
            .filter(|entry| entry.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.flagged_at.cmp(&b.flagged_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn close_oldest_open_entry(
        &self,
        image_id: &str,
        reviewer_id: Option<&str>,
        decision: ModerationDecision,
        reviewed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let mut open: Vec<usize> = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.image_id == image_id && entry.is_pending())
            .map(|(index, _)| index)
            .collect();
        open.sort_by_key(|&index| (state.queue[index].flagged_at, state.queue[index].id));

        match open.first() {
            Some(&index) => {
                let entry = &mut state.queue[index];
                entry.reviewed_at = Some(reviewed_at);
                entry.reviewer_id = reviewer_id.map(|r| r.to_string());
                entry.decision = Some(decision);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn daily_rollup(&self, date: NaiveDate) -> Result<DailyMetric> {
        let state = self.state.read().await;
        let todays: Vec<&ImageRecord> = state
            .images
            .values()
            .filter(|record| record.generated_at.date_naive() == date)
            .collect();

        let failed = todays
            .iter()
            .filter(|record| record.moderation_status == ModerationStatus::Rejected)
            .count() as i64;
        let unique_users = todays
            .iter()
            .filter_map(|record| record.user_id.as_deref())
            .collect::<std::collections::HashSet<_>>()
            .len() as i64;

        Ok(DailyMetric {
            date,
            total_generations: todays.len() as i64,
            successful_generations: todays.len() as i64 - failed,
            failed_generations: failed,
            total_storage_bytes: todays.iter().map(|record| record.file_size).sum(),
            unique_users,
        })
    }

    async fn upsert_daily_metric(&self, metric: &DailyMetric) -> Result<()> {
        self.state
            .write()
            .await
            .metrics
            .insert(metric.date, metric.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageFormat, StylePreset};

    fn sample_verse(reference: &str, use_count: i64, last_used: Option<DateTime<Utc>>) -> Verse {
        Verse {
            reference: reference.to_string(),
            text: "text".to_string(),
            book: "John".to_string(),
            chapter: 3,
            verse: 16,
            translation: "KJV".to_string(),
            theme: None,
            last_used,
            use_count,
        }
    }

    fn sample_image(id: &str, status: ModerationStatus) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            user_id: Some("user-1".to_string()),
            verse_reference: "John 3:16".to_string(),
            verse_text: "For God so loved the world".to_string(),
            prompt: "prompt".to_string(),
            style_preset: StylePreset::Modern,
            blob_key: Some(format!("images/2026/08/{}.webp", id)),
            file_size: 100,
            format: ImageFormat::Webp,
            width: 1024,
            height: 1024,
            tags: vec![],
            moderation_status: status,
            generated_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rotation_prefers_never_used() {
        let store = MemoryMetaStore::new();
        store
            .upsert_verse(&sample_verse("John 3:16", 5, Some(Utc::now())))
            .await
            .unwrap();
        store
            .upsert_verse(&sample_verse("Psalm 23:1", 0, None))
            .await
            .unwrap();

        let picked = store.pick_rotation_verse().await.unwrap().unwrap();
        assert_eq!(picked.reference, "Psalm 23:1");
    }

    #[tokio::test]
    async fn test_close_oldest_open_entry_only() {
        let store = MemoryMetaStore::new();
        let first = store
            .insert_moderation_entry("img-1", "first flag", Utc::now())
            .await
            .unwrap();
        store
            .insert_moderation_entry("img-1", "second flag", Utc::now())
            .await
            .unwrap();

        let closed = store
            .close_oldest_open_entry("img-1", Some("mod-1"), ModerationDecision::Approve, Utc::now())
            .await
            .unwrap();
        assert!(closed);

        let pending = store.pending_reviews(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].id, first.id);
    }

    #[tokio::test]
    async fn test_daily_rollup_counts_by_status() {
        let store = MemoryMetaStore::new();
        store
            .insert_image(&sample_image("a", ModerationStatus::Approved))
            .await
            .unwrap();
        store
            .insert_image(&sample_image("b", ModerationStatus::Rejected))
            .await
            .unwrap();

        let rollup = store.daily_rollup(Utc::now().date_naive()).await.unwrap();
        assert_eq!(rollup.total_generations, 2);
        assert_eq!(rollup.successful_generations, 1);
        assert_eq!(rollup.failed_generations, 1);
        assert_eq!(rollup.unique_users, 1);
    }
}
