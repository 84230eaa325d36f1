//! Keyword pattern compiler.
//!
//! Loads `category -> [phrases]` from TOML and compiles each category into a
//! single case-insensitive, word-boundary `RegexSet`, so every item is
//! scanned once per category regardless of phrase count. A phrase that does
//! not survive regex compilation (stray metacharacters such as `c++`) falls
//! back to lowercase substring matching for that phrase only; the load keeps
//! going with a warning.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use metrics::counter;
use regex::RegexSet;
use serde::Deserialize;
use tracing::warn;

use crate::error::PipelineError;

/// Core categories consumed by the scorer. The keyword file may define more;
/// extra categories simply ride along in the match inventory.
pub mod categories {
    pub const PRICING: &str = "pricing";
    pub const URGENCY_HIGH: &str = "urgency_high";
    pub const URGENCY_MEDIUM: &str = "urgency_medium";
    pub const SUPPLY: &str = "supply";
    pub const STRATEGY: &str = "strategy";
    pub const TECHNOLOGY: &str = "technology";
    pub const CLOUD_SECURITY: &str = "cloud_security";
    pub const MA_INTEL: &str = "ma_intel";
    pub const PARTNERSHIP: &str = "partnership";
    pub const MSP_CONTEXT: &str = "msp_context";
    pub const BUSINESS_IMPACT: &str = "business_impact";
    // Sub-categories feeding boost and urgency rules; their hits fold into
    // the core inventory (partnership / urgency_high respectively).
    pub const PARTNER_TIER_CHANGE: &str = "partner_tier_change";
    pub const BUSINESS_RELATIONSHIP: &str = "business_relationship";
    pub const LICENSE_ENFORCEMENT: &str = "license_enforcement";
    pub const DEADLINE: &str = "deadline";
    pub const SCALE: &str = "scale";
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct KeywordFile(BTreeMap<String, Vec<String>>);

struct CategoryMatcher {
    /// Phrase list in file order; indices align with `set` patterns.
    phrases: Vec<String>,
    set: RegexSet,
    /// (phrase index, lowercase phrase) for phrases that fell back.
    fallback: Vec<(usize, String)>,
    /// set pattern index -> phrase index.
    set_to_phrase: Vec<usize>,
}

/// Compiled, read-only pattern table; built once at startup and shared.
pub struct PatternTable {
    matchers: BTreeMap<String, CategoryMatcher>,
}

impl PatternTable {
    pub fn load_from(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("reading keywords {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        let file: KeywordFile =
            toml::from_str(s).map_err(|e| PipelineError::Config(format!("keywords: {e}")))?;
        Self::compile(file.0)
    }

    pub fn compile(categories: BTreeMap<String, Vec<String>>) -> Result<Self, PipelineError> {
        let mut matchers = BTreeMap::new();
        for (category, phrases) in categories {
            let mut patterns = Vec::new();
            let mut set_to_phrase = Vec::new();
            let mut fallback = Vec::new();
            for (idx, phrase) in phrases.iter().enumerate() {
                // Phrases are inserted verbatim so simple author-side
                // alternations keep working; invalid ones degrade to
                // substring for that phrase alone.
                let pattern = format!(r"(?i)\b(?:{phrase})\b");
                match regex::Regex::new(&pattern) {
                    Ok(_) => {
                        patterns.push(pattern);
                        set_to_phrase.push(idx);
                    }
                    Err(e) => {
                        warn!(
                            category = %category,
                            phrase = %phrase,
                            error = %e,
                            "phrase failed to compile; using substring match"
                        );
                        counter!("pattern_compile_fallback_total").increment(1);
                        fallback.push((idx, phrase.to_lowercase()));
                    }
                }
            }
            let set = RegexSet::new(&patterns)
                .map_err(|e| PipelineError::Config(format!("category `{category}`: {e}")))?;
            matchers.insert(
                category,
                CategoryMatcher {
                    phrases,
                    set,
                    fallback,
                    set_to_phrase,
                },
            );
        }
        Ok(Self { matchers })
    }

    /// Phrases of `category` present in `text`, in file order.
    pub fn matches_in(&self, category: &str, text: &str) -> Vec<&str> {
        let Some(m) = self.matchers.get(category) else {
            return Vec::new();
        };
        let text_lower = text.to_lowercase();
        let mut hit_idx: Vec<usize> = m
            .set
            .matches(text)
            .into_iter()
            .map(|i| m.set_to_phrase[i])
            .collect();
        for (idx, needle) in &m.fallback {
            if text_lower.contains(needle) {
                hit_idx.push(*idx);
            }
        }
        hit_idx.sort_unstable();
        hit_idx.dedup();
        hit_idx.into_iter().map(|i| m.phrases[i].as_str()).collect()
    }

    /// Full inventory: every category with at least one hit.
    pub fn match_all(&self, text: &str) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for category in self.matchers.keys() {
            let hits = self.matches_in(category, text);
            if !hits.is_empty() {
                out.insert(
                    category.clone(),
                    hits.into_iter().map(str::to_string).collect(),
                );
            }
        }
        out
    }

    pub fn has_any(&self, category: &str, text: &str) -> bool {
        !self.matches_in(category, text).is_empty()
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.matchers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PatternTable {
        let toml = r#"
pricing = ["price increase", "licensing change", "cost increase"]
urgency_high = ["immediate", "price increase"]
technology = ["c++", "kubernetes"]
"#;
        PatternTable::from_toml_str(toml).expect("test table")
    }

    #[test]
    fn word_boundary_matching() {
        let t = table();
        assert_eq!(
            t.matches_in(categories::PRICING, "A 20% price increase lands in June"),
            vec!["price increase"]
        );
        // no substring hit inside longer words
        assert!(t
            .matches_in(categories::URGENCY_HIGH, "immediately is a longer word")
            .is_empty());
    }

    #[test]
    fn case_insensitive() {
        let t = table();
        assert_eq!(
            t.matches_in(categories::PRICING, "LICENSING CHANGE announced"),
            vec!["licensing change"]
        );
    }

    #[test]
    fn invalid_phrase_falls_back_to_substring() {
        let t = table();
        // `\bc++\b` is not a valid regex; the phrase still matches literally.
        assert_eq!(
            t.matches_in(categories::TECHNOLOGY, "migrating the c++ agent"),
            vec!["c++"]
        );
        // and the valid phrase in the same category is unaffected
        assert_eq!(
            t.matches_in(categories::TECHNOLOGY, "kubernetes costs"),
            vec!["kubernetes"]
        );
    }

    #[test]
    fn inventory_covers_all_hit_categories() {
        let t = table();
        let inv = t.match_all("Immediate price increase for C++ tooling");
        assert_eq!(inv.len(), 3);
        assert_eq!(inv["urgency_high"], vec!["immediate", "price increase"]);
    }

    #[test]
    fn unknown_category_is_empty() {
        let t = table();
        assert!(t.matches_in("nope", "anything").is_empty());
    }
}
