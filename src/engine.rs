//! # Scoring Engine
//! Explicit bundle of the compiled pattern table, the vendor dictionary and
//! the scoring constants. Built once at startup and passed by reference
//! through the pipeline; read-only afterwards, so it is safe to share across
//! fetch workers. Tests construct isolated engines from inline TOML.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{Config, ScoringConfig};
use crate::error::PipelineError;
use crate::ingest::types::RawItem;
use crate::patterns::PatternTable;
use crate::scoring::{score, ScoredItem};
use crate::vendors::VendorDictionary;

pub struct Engine {
    pub patterns: PatternTable,
    pub dict: Arc<VendorDictionary>,
    pub scoring: ScoringConfig,
}

impl Engine {
    /// Load dictionary and keywords from the paths the config names.
    pub fn from_config(cfg: &Config) -> Result<Self, PipelineError> {
        let dict = Arc::new(VendorDictionary::load_from(&cfg.vendor_dictionary_path)?);
        let patterns = PatternTable::load_from(&cfg.keywords_path)?;
        Ok(Self {
            patterns,
            dict,
            scoring: cfg.scoring.clone(),
        })
    }

    pub fn from_parts(
        patterns: PatternTable,
        dict: Arc<VendorDictionary>,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            patterns,
            dict,
            scoring,
        }
    }

    /// Stamp one item with its score.
    pub fn score_item(&self, item: RawItem, now: DateTime<Utc>) -> ScoredItem {
        let score = score(&item, &self.patterns, &self.dict, &self.scoring, now);
        ScoredItem { item, score }
    }

    /// Stamp a batch, preserving input order.
    pub fn score_all(&self, items: Vec<RawItem>, now: DateTime<Utc>) -> Vec<ScoredItem> {
        items
            .into_iter()
            .map(|item| self.score_item(item, now))
            .collect()
    }
}
