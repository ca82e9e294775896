/*
 * Daily usage aggregates, mirroring the usage_metrics table.
 * Upsert-only and idempotent on date.
 */

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyMetric {
    pub date: NaiveDate,
    #[serde(rename = "totalGenerations")]
    pub total_generations: i64,
    #[serde(rename = "successfulGenerations")]
    pub successful_generations: i64,
    #[serde(rename = "failedGenerations")]
    pub failed_generations: i64,
    #[serde(rename = "totalStorageBytes")]
    pub total_storage_bytes: i64,
    #[serde(rename = "uniqueUsers")]
    pub unique_users: i64,
}
