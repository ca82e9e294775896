/*
 * Prompt composition: theme extraction from verse text plus style modifiers, producing a deterministic model prompt.
 * The same (verse, style) input always yields the same prompt string.
 */

use crate::models::StylePreset;

/// Fixed keyword-to-theme table scanned against the verse text.
/// Order matters: themes are emitted in table order so composition stays deterministic.
const THEME_KEYWORDS: &[(&str, &[&str])] = &[
    ("love", &["love", "loved", "beloved", "charity"]),
    ("hope", &["hope", "hopeth", "trust"]),
    ("strength", &["strength", "strong", "mighty", "power"]),
    ("peace", &["peace", "rest", "still"]),
    ("joy", &["joy", "rejoice", "glad"]),
    ("light", &["light", "lamp", "shine"]),
    ("nature", &["creation", "earth", "mountain", "sea", "heavens", "pasture"]),
    ("wisdom", &["wisdom", "wise", "understanding"]),
];

const FALLBACK_THEME: &str = "faith";

/// Maximum slice of verse text carried into the prompt
const VERSE_EXCERPT_CHARS: usize = 100;

/// Style adjective table keyed by preset
fn style_adjectives(style: StylePreset) -> &'static str {
    match style {
        StylePreset::Modern => "modern, clean lines, vibrant colors, contemporary design",
        StylePreset::Classic => "classical art style, renaissance influence, oil painting texture",
        StylePreset::Minimalist => "minimalist, simple composition, muted palette, negative space",
        StylePreset::Artistic => "artistic, expressive brushstrokes, dramatic lighting, rich texture",
    }
}

/// Stateless prompt composer
#[derive(Debug, Clone, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    /// Extract themes from the verse text via the fixed keyword table
    pub fn extract_themes(&self, verse_text: &str) -> Vec<&'static str> {
        let lowered = verse_text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut themes = Vec::new();
        for (theme, keywords) in THEME_KEYWORDS {
            if keywords.iter().any(|kw| tokens.contains(kw)) {
                themes.push(*theme);
            }
        }
        themes
    }

    /// Compose the full generation prompt for a verse and style
    pub fn compose(&self, verse_text: &str, style: StylePreset) -> String {
        let themes = self.extract_themes(verse_text);
        let theme_clause = if themes.is_empty() {
            FALLBACK_THEME.to_string()
        } else {
            themes.join(", ")
        };

        let excerpt: String = verse_text.chars().take(VERSE_EXCERPT_CHARS).collect();

        format!(
            "Inspirational biblical scene, theme of {}, {}, {}, high quality, detailed, professional",
            theme_clause,
            excerpt.trim(),
            style_adjectives(style)
        )
    }
}
