/*
 * Verse reference material and the parsed reference form shared by the validator and the resolver.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable verse row, mirroring the verses table
/// Rotation bookkeeping (last_used, use_count) is advanced only by the daily-verse picker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verse {
    pub reference: String,
    pub text: String,
    pub book: String,
    pub chapter: i32,
    pub verse: i32,
    pub translation: String,
    pub theme: Option<String>,
    #[serde(rename = "lastUsed")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(rename = "useCount")]
    pub use_count: i64,
}

/// Parsed verse reference: `Book Chapter:Verse` with an optional `-EndVerse` range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseRef {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    #[serde(rename = "endVerse", skip_serializing_if = "Option::is_none")]
    pub end_verse: Option<u32>,
}

impl VerseRef {
    /// Canonical string form used as the cache/lookup key
    pub fn canonical(&self) -> String {
        match self.end_verse {
            Some(end) => format!("{} {}:{}-{}", self.book, self.chapter, self.verse, end),
            None => format!("{} {}:{}", self.book, self.chapter, self.verse),
        }
    }
}

impl std::fmt::Display for VerseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_single_verse() {
        let verse_ref = VerseRef {
            book: "John".to_string(),
            chapter: 3,
            verse: 16,
            end_verse: None,
        };
        assert_eq!(verse_ref.canonical(), "John 3:16");
    }

    #[test]
    fn test_canonical_verse_range() {
        let verse_ref = VerseRef {
            book: "1 Corinthians".to_string(),
            chapter: 13,
            verse: 4,
            end_verse: Some(7),
        };
        assert_eq!(verse_ref.canonical(), "1 Corinthians 13:4-7");
    }
}
