/*
 * MetaStore port and its PostgreSQL adapter: parameterised SQL over the fixed images/verses/moderation_queue/usage_metrics schema.
 * I'm keeping every query bounded by a deadline so a stalled database degrades into an error instead of pinning request handlers.
 */

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::database::connection::DatabasePool;
use crate::models::{
    DailyMetric, ImageFormat, ImageRecord, ModerationDecision, ModerationQueueEntry,
    ModerationStatus, StylePreset, Verse,
};
use crate::utils::error::{AppError, Result};

/// Port over the relational metadata store
/// I'm shaping this as a trait so the test-suite runs against the in-memory adapter while production uses PostgreSQL
#[async_trait]
pub trait MetaStore: Send + Sync {
    // Images
    async fn insert_image(&self, record: &ImageRecord) -> Result<()>;
    async fn get_image(&self, id: &str) -> Result<Option<ImageRecord>>;
    async fn set_image_moderation(
        &self,
        id: &str,
        status: ModerationStatus,
        clear_blob_key: bool,
    ) -> Result<()>;
    async fn delete_image(&self, id: &str) -> Result<()>;
    async fn list_images_generated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ImageRecord>>;
    async fn list_all_images(&self) -> Result<Vec<ImageRecord>>;

    // Verses
    async fn get_verse(&self, book: &str, chapter: u32, verse: u32) -> Result<Option<Verse>>;
    async fn pick_rotation_verse(&self) -> Result<Option<Verse>>;
    async fn touch_verse(&self, reference: &str, now: DateTime<Utc>) -> Result<()>;
    async fn search_verses(&self, query: &str, limit: u32) -> Result<Vec<Verse>>;
    async fn upsert_verse(&self, verse: &Verse) -> Result<()>;

    // Moderation queue
    async fn insert_moderation_entry(
        &self,
        image_id: &str,
        reason: &str,
        flagged_at: DateTime<Utc>,
    ) -> Result<ModerationQueueEntry>;
    async fn pending_reviews(&self, limit: u32) -> Result<Vec<ModerationQueueEntry>>;
    async fn close_oldest_open_entry(
        &self,
        image_id: &str,
        reviewer_id: Option<&str>,
        decision: ModerationDecision,
        reviewed_at: DateTime<Utc>,
    ) -> Result<bool>;

    // Usage metrics
    async fn daily_rollup(&self, date: NaiveDate) -> Result<DailyMetric>;
    async fn upsert_daily_metric(&self, metric: &DailyMetric) -> Result<()>;
}

pub type SharedMetaStore = Arc<dyn MetaStore>;

/// PostgreSQL-backed MetaStore
#[derive(Clone)]
pub struct PgMetaStore {
    pool: DatabasePool,
    op_timeout: Duration,
}

impl PgMetaStore {
    pub fn new(pool: DatabasePool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    /// Bound a query future by the store deadline
    async fn bounded<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| {
                AppError::DatabaseQueryFailed(format!(
                    "metadata store deadline exceeded during {}",
                    operation
                ))
            })?
    }
}

fn image_from_row(row: &PgRow) -> Result<ImageRecord> {
    let tags_json: String = row.try_get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| AppError::DatabaseQueryFailed(format!("corrupt tags column: {}", e)))?;

    let style: String = row.try_get("style_preset")?;
    let format: String = row.try_get("format")?;
    let status: String = row.try_get("moderation_status")?;

    Ok(ImageRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        verse_reference: row.try_get("verse_reference")?,
        verse_text: row.try_get("verse_text")?,
        prompt: row.try_get("prompt")?,
        style_preset: StylePreset::parse(&style)?,
        blob_key: row.try_get("r2_key")?,
        file_size: row.try_get("file_size")?,
        format: ImageFormat::parse(&format)?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        tags,
        moderation_status: ModerationStatus::parse(&status)?,
        generated_at: row.try_get("generated_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn verse_from_row(row: &PgRow) -> Result<Verse> {
    Ok(Verse {
        reference: row.try_get("reference")?,
        text: row.try_get("text")?,
        book: row.try_get("book")?,
        chapter: row.try_get("chapter")?,
        verse: row.try_get("verse")?,
        translation: row.try_get("translation")?,
        theme: row.try_get("theme")?,
        last_used: row.try_get("last_used")?,
        use_count: row.try_get("use_count")?,
    })
}

fn queue_entry_from_row(row: &PgRow) -> Result<ModerationQueueEntry> {
    let decision: Option<String> = row.try_get("decision")?;
    let decision = match decision {
        Some(value) => Some(ModerationDecision::parse(&value)?),
        None => None,
    };

    Ok(ModerationQueueEntry {
        id: row.try_get("id")?,
        image_id: row.try_get("image_id")?,
        flagged_reason: row.try_get("flagged_reason")?,
        flagged_at: row.try_get("flagged_at")?,
        reviewed_at: row.try_get("reviewed_at")?,
        reviewer_id: row.try_get("reviewer_id")?,
        decision,
    })
}

const IMAGE_COLUMNS: &str = "id, user_id, verse_reference, verse_text, prompt, style_preset, \
                             r2_key, file_size, format, width, height, tags, moderation_status, \
                             generated_at, created_at";

#[async_trait]
impl MetaStore for PgMetaStore {
    async fn insert_image(&self, record: &ImageRecord) -> Result<()> {
        let tags_json = serde_json::to_string(&record.tags)?;

        self.bounded("insert_image", async {
            sqlx::query(
                "INSERT INTO images (id, user_id, verse_reference, verse_text, prompt, \
                 style_preset, r2_key, file_size, format, width, height, tags, \
                 moderation_status, generated_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.verse_reference)
            .bind(&record.verse_text)
            .bind(&record.prompt)
            .bind(record.style_preset.as_str())
            .bind(&record.blob_key)
            .bind(record.file_size)
            .bind(record.format.extension())
            .bind(record.width)
            .bind(record.height)
            .bind(&tags_json)
            .bind(record.moderation_status.as_str())
            .bind(record.generated_at)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_image(&self, id: &str) -> Result<Option<ImageRecord>> {
        self.bounded("get_image", async {
            let row = sqlx::query(&format!(
                "SELECT {} FROM images WHERE id = $1",
                IMAGE_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(image_from_row).transpose()
        })
        .await
    }

    async fn set_image_moderation(
        &self,
        id: &str,
        status: ModerationStatus,
        clear_blob_key: bool,
    ) -> Result<()> {
        self.bounded("set_image_moderation", async {
            let result = if clear_blob_key {
                sqlx::query("UPDATE images SET moderation_status = $1, r2_key = NULL WHERE id = $2")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            } else {
                sqlx::query("UPDATE images SET moderation_status = $1 WHERE id = $2")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            };

            if result.rows_affected() == 0 {
                return Err(AppError::not_found(format!("image {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn delete_image(&self, id: &str) -> Result<()> {
        self.bounded("delete_image", async {
            sqlx::query("DELETE FROM images WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn list_images_generated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ImageRecord>> {
        self.bounded("list_images_generated_before", async {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM images WHERE generated_at < $1 ORDER BY generated_at ASC",
                IMAGE_COLUMNS
            ))
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(image_from_row).collect()
        })
        .await
    }

    async fn list_all_images(&self) -> Result<Vec<ImageRecord>> {
        self.bounded("list_all_images", async {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM images ORDER BY created_at ASC",
                IMAGE_COLUMNS
            ))
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(image_from_row).collect()
        })
        .await
    }

    async fn get_verse(&self, book: &str, chapter: u32, verse: u32) -> Result<Option<Verse>> {
        self.bounded("get_verse", async {
            let row = sqlx::query(
                "SELECT reference, text, book, chapter, verse, translation, theme, last_used, \
                 use_count FROM verses WHERE LOWER(book) = LOWER($1) AND chapter = $2 AND verse = $3",
            )
            .bind(book)
            .bind(chapter as i32)
            .bind(verse as i32)
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(verse_from_row).transpose()
        })
        .await
    }

    async fn pick_rotation_verse(&self) -> Result<Option<Verse>> {
        self.bounded("pick_rotation_verse", async {
            // Fairness: never-used rows sort before least-recently-used ones.
            let row = sqlx::query(
                "SELECT reference, text, book, chapter, verse, translation, theme, last_used, \
                 use_count FROM verses ORDER BY last_used ASC NULLS FIRST, use_count ASC LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(verse_from_row).transpose()
        })
        .await
    }

    async fn touch_verse(&self, reference: &str, now: DateTime<Utc>) -> Result<()> {
        self.bounded("touch_verse", async {
            sqlx::query(
                "UPDATE verses SET last_used = $1, use_count = use_count + 1 WHERE reference = $2",
            )
            .bind(now)
            .bind(reference)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn search_verses(&self, query: &str, limit: u32) -> Result<Vec<Verse>> {
        let pattern = format!("%{}%", query.to_lowercase());

        self.bounded("search_verses", async {
            let rows = sqlx::query(
                "SELECT reference, text, book, chapter, verse, translation, theme, last_used, \
                 use_count FROM verses WHERE LOWER(reference) LIKE $1 OR LOWER(text) LIKE $1 \
                 OR LOWER(book) LIKE $1 ORDER BY reference ASC LIMIT $2",
            )
            .bind(&pattern)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(verse_from_row).collect()
        })
        .await
    }

    async fn upsert_verse(&self, verse: &Verse) -> Result<()> {
        self.bounded("upsert_verse", async {
            sqlx::query(
                "INSERT INTO verses (reference, text, book, chapter, verse, translation, theme, \
                 last_used, use_count) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (reference) DO UPDATE SET text = EXCLUDED.text, \
                 translation = EXCLUDED.translation, theme = EXCLUDED.theme",
            )
            .bind(&verse.reference)
            .bind(&verse.text)
            .bind(&verse.book)
            .bind(verse.chapter)
            .bind(verse.verse)
            .bind(&verse.translation)
            .bind(&verse.theme)
            .bind(verse.last_used)
            .bind(verse.use_count)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn insert_moderation_entry(
        &self,
        image_id: &str,
        reason: &str,
        flagged_at: DateTime<Utc>,
    ) -> Result<ModerationQueueEntry> {
        self.bounded("insert_moderation_entry", async {
            let row = sqlx::query(
                "INSERT INTO moderation_queue (image_id, flagged_reason, flagged_at) \
                 VALUES ($1, $2, $3) \
                 RETURNING id, image_id, flagged_reason, flagged_at, reviewed_at, reviewer_id, decision",
            )
            .bind(image_id)
            .bind(reason)
            .bind(flagged_at)
            .fetch_one(&self.pool)
            .await?;

            queue_entry_from_row(&row)
        })
        .await
    }

    async fn pending_reviews(&self, limit: u32) -> Result<Vec<ModerationQueueEntry>> {
        self.bounded("pending_reviews", async {
            let rows = sqlx::query(
                "SELECT id, image_id, flagged_reason, flagged_at, reviewed_at, reviewer_id, \
                 decision FROM moderation_queue WHERE reviewed_at IS NULL \
                 ORDER BY flagged_at ASC, id ASC LIMIT $1",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(queue_entry_from_row).collect()
        })
        .await
    }

    async fn close_oldest_open_entry(
        &self,
        image_id: &str,
        reviewer_id: Option<&str>,
        decision: ModerationDecision,
        reviewed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.bounded("close_oldest_open_entry", async {
            let result = sqlx::query(
                "UPDATE moderation_queue SET reviewed_at = $1, reviewer_id = $2, decision = $3 \
                 WHERE id = (SELECT id FROM moderation_queue WHERE image_id = $4 \
                 AND reviewed_at IS NULL ORDER BY flagged_at ASC, id ASC LIMIT 1)",
            )
            .bind(reviewed_at)
            .bind(reviewer_id)
            .bind(decision.as_str())
            .bind(image_id)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn daily_rollup(&self, date: NaiveDate) -> Result<DailyMetric> {
        let day_start = date
            .and_hms_opt(0, 0, 0)
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
            .ok_or_else(|| AppError::internal("invalid rollup date"))?;
        let day_end = day_start + chrono::Duration::days(1);

        self.bounded("daily_rollup", async {
            let row = sqlx::query(
                "SELECT COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE moderation_status <> 'rejected') AS successful, \
                 COUNT(*) FILTER (WHERE moderation_status = 'rejected') AS failed, \
                 COALESCE(SUM(file_size), 0)::BIGINT AS storage_bytes, \
                 COUNT(DISTINCT user_id) AS unique_users \
                 FROM images WHERE generated_at >= $1 AND generated_at < $2",
            )
            .bind(day_start)
            .bind(day_end)
            .fetch_one(&self.pool)
            .await?;

            Ok(DailyMetric {
                date,
                total_generations: row.try_get("total")?,
                successful_generations: row.try_get("successful")?,
                failed_generations: row.try_get("failed")?,
                total_storage_bytes: row.try_get("storage_bytes")?,
                unique_users: row.try_get("unique_users")?,
            })
        })
        .await
    }

    async fn upsert_daily_metric(&self, metric: &DailyMetric) -> Result<()> {
        self.bounded("upsert_daily_metric", async {
            sqlx::query(
                "INSERT INTO usage_metrics (date, total_generations, successful_generations, \
                 failed_generations, total_storage_bytes, unique_users) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (date) DO UPDATE SET \
                 total_generations = EXCLUDED.total_generations, \
                 successful_generations = EXCLUDED.successful_generations, \
                 failed_generations = EXCLUDED.failed_generations, \
                 total_storage_bytes = EXCLUDED.total_storage_bytes, \
                 unique_users = EXCLUDED.unique_users",
            )
            .bind(metric.date)
            .bind(metric.total_generations)
            .bind(metric.successful_generations)
            .bind(metric.failed_generations)
            .bind(metric.total_storage_bytes)
            .bind(metric.unique_users)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}
