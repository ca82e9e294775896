/*
 * Verse resolution: reference parsing, embedded-set and MetaStore lookup, daily rotation, and substring search.
 * The embedded set keeps the service useful when the metadata store is unreachable; the store remains authoritative for rotation bookkeeping.
 */

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use tracing::{info, warn};

use crate::database::meta_store::SharedMetaStore;
use crate::models::{Verse, VerseRef};
use crate::services::cache_service::CacheService;
use crate::services::validation::parse_verse_reference;
use crate::utils::error::{AppError, Result};

pub const SEARCH_RESULT_CAP: usize = 50;

/// Compiled-in verse set, available even when the metadata store is down
static EMBEDDED_VERSES: Lazy<Vec<Verse>> = Lazy::new(|| {
    const RAW: &[(&str, &str, &str, i32, i32, Option<&str>)] = &[
        ("John 3:16", "For God so loved the world, that he gave his only begotten Son, that whosoever believeth in him should not perish, but have everlasting life.", "John", 3, 16, Some("love")),
        ("Psalm 23:1", "The Lord is my shepherd; I shall not want.", "Psalm", 23, 1, Some("peace")),
        ("Philippians 4:13", "I can do all things through Christ which strengtheneth me.", "Philippians", 4, 13, Some("strength")),
        ("Jeremiah 29:11", "For I know the thoughts that I think toward you, saith the Lord, thoughts of peace, and not of evil, to give you an expected end.", "Jeremiah", 29, 11, Some("hope")),
        ("Romans 8:28", "And we know that all things work together for good to them that love God, to them who are the called according to his purpose.", "Romans", 8, 28, Some("hope")),
        ("Proverbs 3:5", "Trust in the Lord with all thine heart; and lean not unto thine own understanding.", "Proverbs", 3, 5, Some("wisdom")),
        ("Isaiah 40:31", "But they that wait upon the Lord shall renew their strength; they shall mount up with wings as eagles; they shall run, and not be weary; and they shall walk, and not faint.", "Isaiah", 40, 31, Some("strength")),
        ("Matthew 5:14", "Ye are the light of the world. A city that is set on an hill cannot be hid.", "Matthew", 5, 14, Some("light")),
        ("Psalm 46:10", "Be still, and know that I am God: I will be exalted among the heathen, I will be exalted in the earth.", "Psalm", 46, 10, Some("peace")),
        ("Joshua 1:9", "Have not I commanded thee? Be strong and of a good courage; be not afraid, neither be thou dismayed: for the Lord thy God is with thee whithersoever thou goest.", "Joshua", 1, 9, Some("strength")),
        ("Psalm 118:24", "This is the day which the Lord hath made; we will rejoice and be glad in it.", "Psalm", 118, 24, Some("joy")),
        ("1 Corinthians 13:4", "Charity suffereth long, and is kind; charity envieth not; charity vaunteth not itself, is not puffed up.", "1 Corinthians", 13, 4, Some("love")),
        ("Genesis 1:1", "In the beginning God created the heaven and the earth.", "Genesis", 1, 1, Some("nature")),
        ("Psalm 19:1", "The heavens declare the glory of God; and the firmament sheweth his handywork.", "Psalm", 19, 1, Some("nature")),
        ("James 1:5", "If any of you lack wisdom, let him ask of God, that giveth to all men liberally, and upbraideth not; and it shall be given him.", "James", 1, 5, Some("wisdom")),
        ("Nehemiah 8:10", "The joy of the Lord is your strength.", "Nehemiah", 8, 10, Some("joy")),
    ];

    RAW.iter()
        .map(|(reference, text, book, chapter, verse, theme)| Verse {
            reference: reference.to_string(),
            text: text.to_string(),
            book: book.to_string(),
            chapter: *chapter,
            verse: *verse,
            translation: "KJV".to_string(),
            theme: theme.map(|t| t.to_string()),
            last_used: None,
            use_count: 0,
        })
        .collect()
});

/// Verse resolution over the embedded set and the metadata store
#[derive(Clone)]
pub struct VerseResolver {
    meta_store: SharedMetaStore,
    cache: CacheService,
}

impl VerseResolver {
    pub fn new(meta_store: SharedMetaStore, cache: CacheService) -> Self {
        Self { meta_store, cache }
    }

    /// Parse a reference string using the shared grammar
    pub fn parse_reference(&self, reference: &str) -> Result<VerseRef> {
        parse_verse_reference(reference).map_err(AppError::InvalidVerseReference)
    }

    fn embedded_lookup(parsed: &VerseRef) -> Option<Verse> {
        let book_lower = parsed.book.to_lowercase();
        EMBEDDED_VERSES
            .iter()
            .find(|v| {
                v.book.to_lowercase() == book_lower
                    && v.chapter == parsed.chapter as i32
                    && v.verse == parsed.verse as i32
            })
            .cloned()
    }

    /// Resolve a reference to its verse text.
    /// Lookup order: cache, embedded set, metadata store.
    pub async fn get_verse(&self, reference: &str) -> Result<Verse> {
        let parsed = self.parse_reference(reference)?;
        let canonical = parsed.canonical();

        if let Some(verse) = self.cache.get_verse(&canonical).await {
            return Ok(verse);
        }

        if let Some(verse) = Self::embedded_lookup(&parsed) {
            self.cache.set_verse(&canonical, &verse).await;
            return Ok(verse);
        }

        match self
            .meta_store
            .get_verse(&parsed.book, parsed.chapter, parsed.verse)
            .await?
        {
            Some(verse) => {
                self.cache.set_verse(&canonical, &verse).await;
                Ok(verse)
            }
            None => Err(AppError::not_found(format!("verse {}", canonical))),
        }
    }

    /// Pick today's verse by rotation fairness and advance the counters.
    /// When the store is unreachable (or empty) the pick degrades to a uniform
    /// random choice from the embedded set and the rotation update is skipped.
    pub async fn get_daily_verse(&self) -> Result<Verse> {
        match self.meta_store.pick_rotation_verse().await {
            Ok(Some(verse)) => {
                let now = Utc::now();
                if let Err(e) = self.meta_store.touch_verse(&verse.reference, now).await {
                    warn!(
                        "Failed to advance rotation counters for {}: {}",
                        verse.reference, e
                    );
                }
                info!(reference = %verse.reference, "Selected daily verse by rotation");
                Ok(verse)
            }
            Ok(None) => {
                warn!("Verses table is empty, falling back to the embedded set");
                Ok(Self::random_embedded())
            }
            Err(e) => {
                warn!("Metadata store unreachable for daily verse, falling back: {}", e);
                Ok(Self::random_embedded())
            }
        }
    }

    fn random_embedded() -> Verse {
        let index = rand::thread_rng().gen_range(0..EMBEDDED_VERSES.len());
        EMBEDDED_VERSES[index].clone()
    }

    /// Case-insensitive substring search across the embedded set and the store,
    /// deduplicated by reference and capped at 50 results.
    pub async fn search_verses(&self, query: &str) -> Result<Vec<Verse>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Verse> = EMBEDDED_VERSES
            .iter()
            .filter(|v| {
                v.reference.to_lowercase().contains(&needle)
                    || v.text.to_lowercase().contains(&needle)
                    || v.book.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();

        let stored = self
            .meta_store
            .search_verses(&needle, SEARCH_RESULT_CAP as u32)
            .await?;

        for verse in stored {
            if !results.iter().any(|v| v.reference == verse.reference) {
                results.push(verse);
            }
        }

        results.truncate(SEARCH_RESULT_CAP);
        Ok(results)
    }

    /// Seed the embedded set into the store so rotation has material to work
    /// with on a fresh deployment. Existing rotation counters are preserved.
    pub async fn ensure_embedded_verses(&self) -> Result<()> {
        for verse in EMBEDDED_VERSES.iter() {
            self.meta_store.upsert_verse(verse).await?;
        }
        info!("Seeded {} embedded verses", EMBEDDED_VERSES.len());
        Ok(())
    }

    /// Number of compiled-in verses (used by health reporting)
    pub fn embedded_count(&self) -> usize {
        EMBEDDED_VERSES.len()
    }
}
