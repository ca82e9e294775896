/*
 * Request validation: prompt length and blocklist enforcement, the verse-reference grammar, and style preset checks.
 * The sanitiser and the validator share one blocklist so a sanitised prompt can never fail validation on blocked terms.
 */

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::models::{StylePreset, VerseRef};
use crate::services::cache_service::CacheService;

pub const MIN_PROMPT_LENGTH: usize = 10;
pub const MAX_PROMPT_LENGTH: usize = 1000;
pub const MAX_REFERENCE_LENGTH: usize = 100;

/// Cache key (config namespace) holding blocklist overrides
pub const BLOCKLIST_CONFIG_KEY: &str = "moderation-blocklist";

/// Compiled-in blocklist used until the cache provides an override
const DEFAULT_BLOCKLIST: &[&str] = &[
    "nude", "nsfw", "gore", "explicit", "violence", "blood", "weapon", "hate", "drugs", "obscene",
];

/// Grammar for `Book Chapter:Verse` with an optional leading book ordinal and
/// an optional `-EndVerse` range.
static VERSE_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:\d\s)?[A-Za-z][A-Za-z\s]*?)\s+(\d+):(\d+)(?:-(\d+))?$")
        .expect("verse reference regex is valid")
});

/// One field-level validation failure
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &str, code: &str, message: String) -> Self {
        Self {
            field: field.to_string(),
            code: code.to_string(),
            message,
        }
    }
}

/// Aggregated validation outcome
#[derive(Debug, Clone, Serialize, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn details(&self) -> serde_json::Value {
        serde_json::json!({ "errors": self.errors })
    }

    fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
    }
}

/// Validator holding the shared blocklist
pub struct Validator {
    blocklist: RwLock<HashSet<String>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        let blocklist = DEFAULT_BLOCKLIST
            .iter()
            .map(|term| term.to_lowercase())
            .collect();
        Self {
            blocklist: RwLock::new(blocklist),
        }
    }

    /// Refresh the blocklist from the cache's config namespace.
    /// On absence or failure the currently loaded list stays in effect.
    pub async fn load_blocklist(&self, cache: &CacheService) {
        match cache.get_config_value(BLOCKLIST_CONFIG_KEY).await {
            Some(value) => match serde_json::from_value::<Vec<String>>(value) {
                Ok(terms) if !terms.is_empty() => {
                    let normalized: HashSet<String> =
                        terms.iter().map(|t| t.trim().to_lowercase()).collect();
                    info!("Loaded {} blocklist terms from cache", normalized.len());
                    *self.blocklist.write() = normalized;
                }
                Ok(_) => warn!("Cached blocklist is empty, keeping current list"),
                Err(e) => warn!("Cached blocklist is malformed, keeping current list: {}", e),
            },
            None => {}
        }
    }

    /// Administrative blocklist mutation
    pub fn add_blocked_term(&self, term: &str) {
        self.blocklist.write().insert(term.trim().to_lowercase());
    }

    pub fn remove_blocked_term(&self, term: &str) {
        self.blocklist.write().remove(&term.trim().to_lowercase());
    }

    fn blocked_terms_in(&self, text: &str) -> Vec<String> {
        let blocklist = self.blocklist.read();
        let mut found: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(|token| token.to_lowercase())
            .filter(|token| blocklist.contains(token))
            .collect();
        found.sort();
        found.dedup();
        found
    }

    /// Validate a free-text prompt
    pub fn validate_prompt(&self, text: &str) -> ValidationReport {
        let mut report = ValidationReport::default();
        let trimmed = text.trim();

        if trimmed.is_empty() {
            report.errors.push(ValidationIssue::new(
                "customPrompt",
                "invalid_format",
                "Prompt cannot be empty".to_string(),
            ));
            return report;
        }

        if trimmed.len() < MIN_PROMPT_LENGTH {
            report.errors.push(ValidationIssue::new(
                "customPrompt",
                "invalid_format",
                format!("Prompt must be at least {} characters", MIN_PROMPT_LENGTH),
            ));
        } else if trimmed.len() > MAX_PROMPT_LENGTH {
            report.errors.push(ValidationIssue::new(
                "customPrompt",
                "invalid_format",
                format!("Prompt must be at most {} characters", MAX_PROMPT_LENGTH),
            ));
        }

        let blocked = self.blocked_terms_in(trimmed);
        if !blocked.is_empty() {
            report.errors.push(ValidationIssue::new(
                "customPrompt",
                "blocked_terms",
                format!("Prompt contains blocked terms: {}", blocked.join(", ")),
            ));
        }

        report
    }

    /// Remove blocklisted tokens word-by-word, collapsing the holes.
    /// Tokenization matches `blocked_terms_in` exactly (alphanumeric runs),
    /// so a sanitised prompt can never still carry a blocked term.
    /// Idempotent; never inserts content.
    pub fn sanitize_prompt(&self, text: &str) -> String {
        let blocklist = self.blocklist.read();

        let mut cleaned = String::with_capacity(text.len());
        let mut token = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                token.push(c);
            } else {
                if !blocklist.contains(&token.to_lowercase()) {
                    cleaned.push_str(&token);
                }
                token.clear();
                cleaned.push(c);
            }
        }
        if !blocklist.contains(&token.to_lowercase()) {
            cleaned.push_str(&token);
        }

        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Validate a verse reference against the grammar
    pub fn validate_verse_reference(&self, reference: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        match parse_verse_reference(reference) {
            Ok(_) => {}
            Err(message) => {
                report.errors.push(ValidationIssue::new(
                    "verseReference",
                    "invalid_verse_reference",
                    message,
                ));
            }
        }

        report
    }

    /// Validate an optional style preset (empty is permitted, defaulted later)
    pub fn validate_style_preset(&self, style: Option<&str>) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Some(style) = style {
            if !style.trim().is_empty() && StylePreset::parse(style).is_err() {
                let allowed: Vec<&str> = StylePreset::ALL.iter().map(|s| s.as_str()).collect();
                report.errors.push(ValidationIssue::new(
                    "stylePreset",
                    "invalid_format",
                    format!(
                        "Unknown style preset '{}'. Allowed: {}",
                        style.trim(),
                        allowed.join(", ")
                    ),
                ));
            }
        }

        report
    }

    /// Aggregate validation over an entire generation request
    pub fn validate_generation_request(
        &self,
        verse_reference: Option<&str>,
        style_preset: Option<&str>,
        custom_prompt: Option<&str>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        match verse_reference {
            Some(reference) => report.merge(self.validate_verse_reference(reference)),
            None => report.errors.push(ValidationIssue::new(
                "verseReference",
                "missing_required_field",
                "verseReference is required".to_string(),
            )),
        }

        report.merge(self.validate_style_preset(style_preset));

        if let Some(prompt) = custom_prompt {
            if !prompt.trim().is_empty() {
                report.merge(self.validate_prompt(prompt));
            }
        }

        report
    }
}

/// Parse a verse reference into its structured form.
/// Shared by the validator and the verse resolver so they agree on the grammar.
pub fn parse_verse_reference(reference: &str) -> std::result::Result<VerseRef, String> {
    let trimmed = reference.trim();

    if trimmed.is_empty() {
        return Err("Verse reference cannot be empty".to_string());
    }
    if trimmed.len() > MAX_REFERENCE_LENGTH {
        return Err(format!(
            "Verse reference must be at most {} characters",
            MAX_REFERENCE_LENGTH
        ));
    }

    let captures = VERSE_REFERENCE_RE
        .captures(trimmed)
        .ok_or_else(|| format!("'{}' is not a valid verse reference", trimmed))?;

    let book = captures[1].trim().to_string();
    let chapter: u32 = captures[2]
        .parse()
        .map_err(|_| "Chapter number is out of range".to_string())?;
    let verse: u32 = captures[3]
        .parse()
        .map_err(|_| "Verse number is out of range".to_string())?;
    let end_verse: Option<u32> = match captures.get(4) {
        Some(m) => Some(
            m.as_str()
                .parse()
                .map_err(|_| "End verse number is out of range".to_string())?,
        ),
        None => None,
    };

    if chapter == 0 {
        return Err("Chapter must be a positive number".to_string());
    }
    if verse == 0 {
        return Err("Verse must be a positive number".to_string());
    }
    if let Some(end) = end_verse {
        if end <= verse {
            return Err("End verse must be greater than the start verse".to_string());
        }
    }

    Ok(VerseRef {
        book,
        chapter,
        verse,
        end_verse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("John 3:16", "John", 3, 16, None)]
    #[case("  Psalm 23:1  ", "Psalm", 23, 1, None)]
    #[case("1 Corinthians 13:4-7", "1 Corinthians", 13, 4, Some(7))]
    #[case("Song of Solomon 2:1", "Song of Solomon", 2, 1, None)]
    fn test_reference_parsing(
        #[case] input: &str,
        #[case] book: &str,
        #[case] chapter: u32,
        #[case] verse: u32,
        #[case] end_verse: Option<u32>,
    ) {
        let parsed = parse_verse_reference(input).unwrap();
        assert_eq!(parsed.book, book);
        assert_eq!(parsed.chapter, chapter);
        assert_eq!(parsed.verse, verse);
        assert_eq!(parsed.end_verse, end_verse);
    }

    #[rstest]
    #[case("")]
    #[case("John")]
    #[case("John 3")]
    #[case("John 0:16")]
    #[case("John 3:0")]
    #[case("John 3:16-16")]
    #[case("John 3:16-9")]
    #[case("3:16")]
    fn test_invalid_references(#[case] input: &str) {
        assert!(parse_verse_reference(input).is_err());
    }

    #[test]
    fn test_reference_length_cap() {
        let long = format!("{} 1:2", "A".repeat(120));
        assert!(parse_verse_reference(&long).is_err());
    }

    #[test]
    fn test_prompt_length_bounds() {
        let validator = Validator::new();

        assert!(!validator.validate_prompt("").is_valid());
        assert!(!validator.validate_prompt("short").is_valid());
        assert!(!validator.validate_prompt(&"x".repeat(1001)).is_valid());
        assert!(validator
            .validate_prompt("a serene mountain landscape at dawn")
            .is_valid());
    }

    #[test]
    fn test_blocked_terms_detected_case_insensitively() {
        let validator = Validator::new();
        let report = validator.validate_prompt("a peaceful scene with NSFW content");
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.code == "blocked_terms"));
    }

    #[test]
    fn test_sanitized_prompt_passes_validation() {
        let validator = Validator::new();
        let dirty = "a beautiful gore landscape with explicit colors everywhere";
        assert!(!validator.validate_prompt(dirty).is_valid());

        let clean = validator.sanitize_prompt(dirty);
        assert!(validator.validate_prompt(&clean).is_valid());
        assert_eq!(clean, "a beautiful landscape with colors everywhere");
    }

    #[test]
    fn test_sanitizer_catches_punctuated_blocked_terms() {
        let validator = Validator::new();
        let dirty = "a blood-soaked battlefield stretching beneath explicit, stormy skies";
        assert!(!validator.validate_prompt(dirty).is_valid());

        // Hyphenated and comma-attached blocked terms tokenize the same way
        // in the validator and the sanitiser.
        let clean = validator.sanitize_prompt(dirty);
        assert!(validator.validate_prompt(&clean).is_valid());
        assert!(!clean.to_lowercase().contains("blood"));
        assert!(!clean.to_lowercase().contains("explicit"));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let validator = Validator::new();
        let dirty = "violence in the blood moonlight";
        let once = validator.sanitize_prompt(dirty);
        let twice = validator.sanitize_prompt(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_style_preset_empty_is_permitted() {
        let validator = Validator::new();
        assert!(validator.validate_style_preset(None).is_valid());
        assert!(validator.validate_style_preset(Some("")).is_valid());
        assert!(validator.validate_style_preset(Some("classic")).is_valid());
        assert!(!validator.validate_style_preset(Some("cubist")).is_valid());
    }

    #[test]
    fn test_generation_request_accumulates_errors() {
        let validator = Validator::new();
        let report = validator.validate_generation_request(None, Some("cubist"), Some("gore"));
        // Missing reference, unknown style, and two prompt issues: "gore" is
        // both under the length minimum and a blocked term.
        assert_eq!(report.errors.len(), 4);
    }

    #[test]
    fn test_blocklist_mutation() {
        let validator = Validator::new();
        validator.add_blocked_term("forbidden");
        assert!(!validator
            .validate_prompt("an image of the forbidden city gates")
            .is_valid());

        validator.remove_blocked_term("forbidden");
        assert!(validator
            .validate_prompt("an image of the forbidden city gates")
            .is_valid());
    }
}
