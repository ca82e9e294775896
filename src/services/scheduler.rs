/*
 * Scheduler: maps cron triggers to the daily-verse, cleanup, and metrics jobs and drives them on a minute tick.
 * Bindings are exact cron-string pairs fixed at bootstrap; job errors are logged and the next scheduled fire is the retry.
 */

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{ModerationStatus, SaveImageOptions, StylePreset};
use crate::services::cleanup_service::CleanupService;
use crate::services::model_client::{GenerationTask, SharedImageModel};
use crate::services::prompt::PromptComposer;
use crate::services::storage_service::StorageService;
use crate::services::validation::Validator;
use crate::services::verse_service::VerseResolver;
use crate::telemetry::Telemetry;
use crate::utils::error::Result;

pub const DAILY_VERSE_CRON: &str = "0 6 * * *";
pub const CLEANUP_CRON: &str = "0 2 * * 0";
pub const METRICS_CRON: &str = "0 0 * * *";

/// The jobs the scheduler can dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    DailyVerse,
    Cleanup,
    Metrics,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::DailyVerse => "daily-verse",
            JobKind::Cleanup => "cleanup",
            JobKind::Metrics => "metrics",
        }
    }
}

/// An external trigger firing a scheduled job
#[derive(Debug, Clone)]
pub struct ScheduledTrigger {
    pub scheduled_time: DateTime<Utc>,
    pub cron: String,
}

/// Match one cron field: `*` or an exact number
fn field_matches(field: &str, value: u32) -> bool {
    field == "*" || field.parse::<u32>().map(|n| n == value).unwrap_or(false)
}

/// Evaluate a five-field cron expression (minute hour dom month dow) at a
/// given instant. Only numeric fields and `*` are supported, which covers
/// every binding this service registers.
pub fn cron_matches(cron: &str, at: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }

    field_matches(fields[0], at.minute())
        && field_matches(fields[1], at.hour())
        && field_matches(fields[2], at.day())
        && field_matches(fields[3], at.month())
        && field_matches(fields[4], at.weekday().num_days_from_sunday())
}

/// Scheduler wiring the recurring jobs to their collaborators
pub struct Scheduler {
    bindings: HashMap<String, JobKind>,
    verse_resolver: VerseResolver,
    prompt_composer: PromptComposer,
    model: SharedImageModel,
    storage: StorageService,
    cleanup: CleanupService,
    validator: Arc<Validator>,
    telemetry: Telemetry,
}

impl Scheduler {
    pub fn new(
        verse_resolver: VerseResolver,
        prompt_composer: PromptComposer,
        model: SharedImageModel,
        storage: StorageService,
        cleanup: CleanupService,
        validator: Arc<Validator>,
        telemetry: Telemetry,
    ) -> Self {
        let mut bindings = HashMap::new();
        bindings.insert(DAILY_VERSE_CRON.to_string(), JobKind::DailyVerse);
        bindings.insert(CLEANUP_CRON.to_string(), JobKind::Cleanup);
        bindings.insert(METRICS_CRON.to_string(), JobKind::Metrics);

        Self {
            bindings,
            verse_resolver,
            prompt_composer,
            model,
            storage,
            cleanup,
            validator,
            telemetry,
        }
    }

    /// Resolve a trigger to its bound job by exact cron string
    pub fn job_for(&self, trigger: &ScheduledTrigger) -> Option<JobKind> {
        self.bindings.get(&trigger.cron).copied()
    }

    /// Dispatch a trigger. Job failures are swallowed into the logs; the next
    /// scheduled fire is the retry.
    pub async fn dispatch(&self, trigger: &ScheduledTrigger) {
        let Some(job) = self.job_for(trigger) else {
            warn!(cron = %trigger.cron, "Trigger has no bound job, ignoring");
            return;
        };

        info!(job = job.name(), cron = %trigger.cron, "Dispatching scheduled job");
        let started = std::time::Instant::now();

        let outcome = self.run_job(job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                self.telemetry.record_operation(
                    job.name(),
                    duration_ms,
                    "success",
                    &format!("scheduled-{}", trigger.scheduled_time.timestamp()),
                    None,
                );
            }
            Err(e) => {
                error!(job = job.name(), "Scheduled job failed: {}", e);
            }
        }
    }

    /// Run one job to completion
    pub async fn run_job(&self, job: JobKind) -> Result<()> {
        match job {
            JobKind::DailyVerse => self.run_daily_verse().await,
            JobKind::Cleanup => self.run_cleanup().await,
            JobKind::Metrics => self.run_metrics().await,
        }
    }

    /// Generate the daily verse image and publish it to the cache
    async fn run_daily_verse(&self) -> Result<()> {
        let verse = self.verse_resolver.get_daily_verse().await?;
        let prompt = self.prompt_composer.compose(&verse.text, StylePreset::Classic);

        let generated = match self.model.run(&GenerationTask::new(prompt.clone())).await {
            Ok(generated) => generated,
            Err(e) => {
                self.telemetry.track_generation(false, None);
                return Err(e);
            }
        };

        let record = self
            .storage
            .save_image(
                &generated.bytes,
                SaveImageOptions {
                    user_id: None,
                    verse_reference: verse.reference.clone(),
                    verse_text: verse.text.clone(),
                    prompt,
                    style_preset: StylePreset::Classic,
                    width: generated.width as i32,
                    height: generated.height as i32,
                    tags: vec!["daily-verse".to_string()],
                    moderation_status: ModerationStatus::Approved,
                    requested_id: None,
                    generated_at: Utc::now(),
                },
            )
            .await?;

        self.storage
            .cache()
            .set_daily_verse_image_id(&record.id)
            .await;
        self.telemetry.track_generation(true, None);
        self.telemetry.track_blob_write(record.file_size as u64);

        info!(
            image_id = %record.id,
            reference = %verse.reference,
            "Daily verse image published"
        );
        Ok(())
    }

    async fn run_cleanup(&self) -> Result<()> {
        let report = self.cleanup.perform_cleanup_cycle().await?;
        info!(
            eligible = report.candidates.eligible.len(),
            protected = report.candidates.protected.len(),
            deleted = report.outcome.deleted_image_ids.len(),
            failed = report.outcome.failed_image_ids.len(),
            backup = %report.backup.key,
            pruned_backups = report.pruned_backups,
            "Cleanup cycle completed"
        );
        Ok(())
    }

    /// Roll today's aggregates into the usage_metrics table; also the cheap
    /// piggyback point for the blocklist refresh and the alert janitor.
    async fn run_metrics(&self) -> Result<()> {
        let today = Utc::now().date_naive();
        let metric = self.storage.meta_store().daily_rollup(today).await?;
        self.storage.meta_store().upsert_daily_metric(&metric).await?;

        self.validator.load_blocklist(self.storage.cache()).await;
        self.telemetry.check_quotas();
        let pruned = self.telemetry.prune_alerts();

        info!(
            date = %today,
            total = metric.total_generations,
            successful = metric.successful_generations,
            failed = metric.failed_generations,
            storage_bytes = metric.total_storage_bytes,
            unique_users = metric.unique_users,
            pruned_alerts = pruned,
            "Usage metrics rolled up"
        );
        Ok(())
    }

    /// Fire every binding whose cron matches the given minute
    pub async fn run_pending(&self, at: DateTime<Utc>) {
        let due: Vec<ScheduledTrigger> = self
            .bindings
            .keys()
            .filter(|cron| cron_matches(cron, at))
            .map(|cron| ScheduledTrigger {
                scheduled_time: at,
                cron: cron.clone(),
            })
            .collect();

        for trigger in due {
            self.dispatch(&trigger).await;
        }
    }

    /// Background driver evaluating bindings once per minute.
    /// Scheduled handlers run to completion; the loop stops with the process.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_fired_minute: Option<i64> = None;

            loop {
                interval.tick().await;
                let now = Utc::now();
                let minute_stamp = now.timestamp() / 60;

                if last_fired_minute == Some(minute_stamp) {
                    continue;
                }
                last_fired_minute = Some(minute_stamp);

                self.run_pending(now).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cron_matching() {
        // 06:00 on a Wednesday.
        let at = Utc.with_ymd_and_hms(2026, 8, 5, 6, 0, 0).unwrap();
        assert!(cron_matches("0 6 * * *", at));
        assert!(!cron_matches("0 2 * * 0", at));
        assert!(!cron_matches("0 0 * * *", at));

        // 02:00 on a Sunday.
        let sunday = Utc.with_ymd_and_hms(2026, 8, 2, 2, 0, 0).unwrap();
        assert!(cron_matches("0 2 * * 0", sunday));
        assert!(!cron_matches("0 2 * * 1", sunday));
    }

    #[test]
    fn test_malformed_cron_never_matches() {
        let at = Utc.with_ymd_and_hms(2026, 8, 5, 6, 0, 0).unwrap();
        assert!(!cron_matches("", at));
        assert!(!cron_matches("0 6 * *", at));
        assert!(!cron_matches("x y z w v", at));
    }
}
