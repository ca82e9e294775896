/*
 * Models module aggregator organizing all data structures and business logic entities for the verse-canvas backend.
 * I'm providing a clean interface to image metadata, verse reference material, moderation queue entries, and usage metrics with comprehensive serialization support.
 */

pub mod image;
pub mod metrics;
pub mod moderation;
pub mod verse;

// Re-export commonly used models for convenient access throughout the application
pub use image::{ImageFormat, ImageRecord, ModerationStatus, SaveImageOptions, StylePreset};
pub use metrics::DailyMetric;
pub use moderation::{ModerationDecision, ModerationQueueEntry};
pub use verse::{Verse, VerseRef};
