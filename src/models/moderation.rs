/*
 * Moderation queue entries and review decisions.
 * Invariant: reviewed_at, reviewer_id, and decision are co-null or co-set.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationDecision {
    Approve,
    Reject,
}

impl ModerationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationDecision::Approve => "approve",
            ModerationDecision::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "approve" => Ok(ModerationDecision::Approve),
            "reject" => Ok(ModerationDecision::Reject),
            other => Err(AppError::invalid_request(format!(
                "Unknown moderation action: {}",
                other
            ))),
        }
    }
}

/// A flag raised for human review, mirroring the moderation_queue table
/// Multiple open entries per image are permitted; closing the oldest open entry is independent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationQueueEntry {
    pub id: i64,
    #[serde(rename = "imageId")]
    pub image_id: String,
    #[serde(rename = "flaggedReason")]
    pub flagged_reason: String,
    #[serde(rename = "flaggedAt")]
    pub flagged_at: DateTime<Utc>,
    #[serde(rename = "reviewedAt")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(rename = "reviewerId")]
    pub reviewer_id: Option<String>,
    pub decision: Option<ModerationDecision>,
}

impl ModerationQueueEntry {
    pub fn is_pending(&self) -> bool {
        self.reviewed_at.is_none()
    }
}
