/*
 * Image metadata model covering generated artefacts, style presets, and binary format detection.
 * I'm keeping the persisted column set and the serialized API shape in one place so the storage facade and the routes never disagree about field names.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, Result};

/// Visual style presets accepted by the generation endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StylePreset {
    Modern,
    Classic,
    Minimalist,
    Artistic,
}

impl StylePreset {
    pub const ALL: [StylePreset; 4] = [
        StylePreset::Modern,
        StylePreset::Classic,
        StylePreset::Minimalist,
        StylePreset::Artistic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StylePreset::Modern => "modern",
            StylePreset::Classic => "classic",
            StylePreset::Minimalist => "minimalist",
            StylePreset::Artistic => "artistic",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "modern" => Ok(StylePreset::Modern),
            "classic" => Ok(StylePreset::Classic),
            "minimalist" => Ok(StylePreset::Minimalist),
            "artistic" => Ok(StylePreset::Artistic),
            other => Err(AppError::invalid_request(format!(
                "Unknown style preset: {}",
                other
            ))),
        }
    }
}

impl Default for StylePreset {
    fn default() -> Self {
        StylePreset::Modern
    }
}

impl std::fmt::Display for StylePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary image formats the service stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Sniff the format from magic bytes; unknown payloads default to webp
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            ImageFormat::Webp
        } else if bytes.len() >= 4 && bytes[0..4] == [0x89, 0x50, 0x4E, 0x47] {
            ImageFormat::Png
        } else if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
            ImageFormat::Jpeg
        } else {
            ImageFormat::Webp
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "webp" => Ok(ImageFormat::Webp),
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(AppError::internal(format!("Unknown image format: {}", other))),
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Moderation lifecycle of a stored image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(ModerationStatus::Pending),
            "approved" => Ok(ModerationStatus::Approved),
            "rejected" => Ok(ModerationStatus::Rejected),
            other => Err(AppError::internal(format!(
                "Unknown moderation status: {}",
                other
            ))),
        }
    }
}

/// A generated artefact and its metadata, mirroring the images table
/// Invariant: blob_key is populated iff moderation_status is not rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    #[serde(rename = "imageId")]
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "verseReference")]
    pub verse_reference: String,
    #[serde(rename = "verseText")]
    pub verse_text: String,
    pub prompt: String,
    #[serde(rename = "stylePreset")]
    pub style_preset: StylePreset,
    #[serde(rename = "blobKey")]
    pub blob_key: Option<String>,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    pub format: ImageFormat,
    pub width: i32,
    pub height: i32,
    pub tags: Vec<String>,
    #[serde(rename = "moderationStatus")]
    pub moderation_status: ModerationStatus,
    #[serde(rename = "generatedAt")]
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Everything the storage facade needs to persist a freshly generated image
#[derive(Debug, Clone)]
pub struct SaveImageOptions {
    pub user_id: Option<String>,
    pub verse_reference: String,
    pub verse_text: String,
    pub prompt: String,
    pub style_preset: StylePreset,
    pub width: i32,
    pub height: i32,
    pub tags: Vec<String>,
    pub moderation_status: ModerationStatus,
    /// Client idempotency key; when present the image id is pinned to it so
    /// duplicate requests resolve to the same artefact.
    pub requested_id: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection_webp() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0x10, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(b"WEBPVP8 ");
        assert_eq!(ImageFormat::from_magic_bytes(&bytes), ImageFormat::Webp);
    }

    #[test]
    fn test_format_detection_png() {
        let bytes = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(ImageFormat::from_magic_bytes(&bytes), ImageFormat::Png);
    }

    #[test]
    fn test_format_detection_jpeg() {
        let bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        assert_eq!(ImageFormat::from_magic_bytes(&bytes), ImageFormat::Jpeg);
    }

    #[test]
    fn test_format_detection_defaults_to_webp() {
        assert_eq!(ImageFormat::from_magic_bytes(b"plain text"), ImageFormat::Webp);
        assert_eq!(ImageFormat::from_magic_bytes(&[]), ImageFormat::Webp);
        // A RIFF container that is not WEBP still falls through to the default.
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0x10, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(b"AVI LIST");
        assert_eq!(ImageFormat::from_magic_bytes(&bytes), ImageFormat::Webp);
    }

    proptest::proptest! {
        #[test]
        fn unrecognised_payloads_default_to_webp(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64)) {
            let starts_with_magic = (bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
                || bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47])
                || bytes.starts_with(&[0xFF, 0xD8, 0xFF]);
            proptest::prop_assume!(!starts_with_magic);
            proptest::prop_assert_eq!(ImageFormat::from_magic_bytes(&bytes), ImageFormat::Webp);
        }
    }

    #[test]
    fn test_style_preset_parsing() {
        assert_eq!(StylePreset::parse("modern").unwrap(), StylePreset::Modern);
        assert_eq!(StylePreset::parse(" Classic ").unwrap(), StylePreset::Classic);
        assert!(StylePreset::parse("vaporwave").is_err());
    }

    #[test]
    fn test_serde_shape_uses_camel_case() {
        let record = ImageRecord {
            id: "123-abcd1234".to_string(),
            user_id: None,
            verse_reference: "John 3:16".to_string(),
            verse_text: "For God so loved the world".to_string(),
            prompt: "a prompt".to_string(),
            style_preset: StylePreset::Modern,
            blob_key: Some("images/2026/08/123-abcd1234.webp".to_string()),
            file_size: 42,
            format: ImageFormat::Webp,
            width: 1024,
            height: 1024,
            tags: vec!["daily-verse".to_string()],
            moderation_status: ModerationStatus::Approved,
            generated_at: Utc::now(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["imageId"], "123-abcd1234");
        assert_eq!(json["stylePreset"], "modern");
        assert_eq!(json["moderationStatus"], "approved");
        assert_eq!(json["blobKey"], "images/2026/08/123-abcd1234.webp");
    }
}
