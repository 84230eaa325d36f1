//! Typed pipeline configuration.
//!
//! One TOML file, every recognised option enumerated below. Unknown fields
//! are rejected at parse time rather than silently ignored. Credentials are
//! never part of the file; they come from the environment at the point of
//! use (`SEARCH_API_KEY`, `SEARCH_CX`, `LLM_API_KEY`, `FORUM_USER_AGENT`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_PATH: &str = "config/pricing-radar.toml";
pub const ENV_CONFIG_PATH: &str = "PRICING_RADAR_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_vendor_dictionary_path")]
    pub vendor_dictionary_path: PathBuf,
    #[serde(default = "default_keywords_path")]
    pub keywords_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    #[serde(default)]
    pub forum: ForumConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForumConfig {
    #[serde(default)]
    pub sub_channels: Vec<String>,
    #[serde(default = "default_forum_rate")]
    pub rate_per_sec: f64,
    #[serde(default = "default_min_engagement")]
    pub min_upvotes: u32,
    #[serde(default = "default_min_engagement")]
    pub min_comments: u32,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_fallback_window_hours")]
    pub fallback_window_hours: u32,
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: usize,
    /// Listing API root; tests point this at a fixture server.
    #[serde(default = "default_forum_base_url")]
    pub base_url: String,
}

impl Default for ForumConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty forum config")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Queries may carry a `{year}` token, substituted at fetch time.
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default = "default_results_per_query")]
    pub results_per_query: u32,
    #[serde(default = "default_date_restriction")]
    pub date_restriction: String,
    #[serde(default = "default_search_rate")]
    pub rate_per_sec: f64,
    /// How many tier-1 vendors get auto-generated pricing queries.
    #[serde(default = "default_vendor_query_limit")]
    pub vendor_query_limit: usize,
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty search config")
    }
}

/// Every numeric constant of the scorer. Defaults match the published
/// contract; any of them can be pinned from the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringConfig {
    #[serde(default = "d_pricing_weight")]
    pub pricing_weight: f64,
    #[serde(default = "d_pricing_cap")]
    pub pricing_cap: f64,
    #[serde(default = "d_urgency_high_weight")]
    pub urgency_high_weight: f64,
    #[serde(default = "d_urgency_high_cap")]
    pub urgency_high_cap: f64,
    #[serde(default = "d_urgency_medium_weight")]
    pub urgency_medium_weight: f64,
    #[serde(default = "d_urgency_medium_cap")]
    pub urgency_medium_cap: f64,
    #[serde(default = "d_context_weight")]
    pub context_weight: f64,
    #[serde(default = "d_context_cap")]
    pub context_cap: f64,
    #[serde(default = "d_vendor_weight")]
    pub vendor_weight: f64,
    #[serde(default = "d_vendor_cap")]
    pub vendor_cap: f64,
    #[serde(default = "d_tier1_bonus")]
    pub tier1_bonus: f64,
    #[serde(default = "d_recency_24h")]
    pub recency_24h: f64,
    #[serde(default = "d_recency_7d")]
    pub recency_7d: f64,
    #[serde(default = "d_cloud_security_boost")]
    pub cloud_security_boost: f64,
    #[serde(default = "d_cloud_security_vendor_boost")]
    pub cloud_security_vendor_boost: f64,
    #[serde(default = "d_cloud_security_cap")]
    pub cloud_security_cap: f64,
    #[serde(default = "d_ma_boost")]
    pub ma_boost: f64,
    #[serde(default = "d_ma_consolidator_boost")]
    pub ma_consolidator_boost: f64,
    #[serde(default = "d_ma_enforcement_boost")]
    pub ma_enforcement_boost: f64,
    #[serde(default = "d_ma_cap")]
    pub ma_cap: f64,
    #[serde(default = "d_partnership_boost")]
    pub partnership_boost: f64,
    #[serde(default = "d_partner_tier_change_boost")]
    pub partner_tier_change_boost: f64,
    #[serde(default = "d_business_relationship_boost")]
    pub business_relationship_boost: f64,
    #[serde(default = "d_partnership_cap")]
    pub partnership_cap: f64,
    #[serde(default = "d_msp_multiplier")]
    pub msp_multiplier: f64,
    #[serde(default = "d_medium_urgency_threshold")]
    pub medium_urgency_threshold: f64,
    #[serde(default = "d_revenue_weights")]
    pub revenue_weights: RevenueWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty scoring config")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevenueWeights {
    pub immediate: f64,
    pub margin: f64,
    pub competitive: f64,
    pub strategic: f64,
    pub urgency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorConfig {
    #[serde(default = "default_selector_k")]
    pub k: usize,
    #[serde(default = "default_bucket_pct")]
    pub bucket_pct: BucketPct,
    #[serde(default = "d_engagement_upvotes")]
    pub engagement_upvotes: u32,
    #[serde(default = "d_engagement_comments")]
    pub engagement_comments: u32,
    #[serde(default = "d_engagement_min_total")]
    pub engagement_min_total: f64,
    #[serde(default = "d_relevance_min_total")]
    pub relevance_min_total: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty selector config")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketPct {
    pub critical: f64,
    pub engagement: f64,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_llm_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty llm config")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_top_vendors")]
    pub top_vendors: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty report config")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_global_timeout_sec")]
    pub global_timeout_sec: u64,
    #[serde(default = "default_source_timeout_sec")]
    pub source_timeout_sec: u64,
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty run config")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u32,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty cache config")
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty config")
    }
}

impl Config {
    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Load using `$PRICING_RADAR_CONFIG`, falling back to the default path,
    /// falling back to built-in defaults when no file exists.
    pub fn load_default() -> Result<Self, PipelineError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            return Self::load_from(Path::new(&p));
        }
        let p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Ok(Self::default())
    }

    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        let cfg: Config =
            toml::from_str(s).map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let b = &self.selector.bucket_pct;
        let sum = b.critical + b.engagement + b.relevance;
        if !(0.0..=1.0).contains(&sum) {
            return Err(PipelineError::Config(format!(
                "selector.bucket_pct must sum to at most 1.0, got {sum:.2}"
            )));
        }
        if self.selector.k == 0 {
            return Err(PipelineError::Config("selector.k must be positive".into()));
        }
        if self.sources.forum.rate_per_sec <= 0.0 || self.sources.search.rate_per_sec <= 0.0 {
            return Err(PipelineError::Config(
                "rate_per_sec must be positive".into(),
            ));
        }
        if self.llm.timeout_sec == 0 || self.run.global_timeout_sec == 0 {
            return Err(PipelineError::Config("timeouts must be positive".into()));
        }
        let rw = &self.scoring.revenue_weights;
        let rw_sum = rw.immediate + rw.margin + rw.competitive + rw.strategic + rw.urgency;
        if (rw_sum - 1.0).abs() > 1e-6 {
            return Err(PipelineError::Config(format!(
                "scoring.revenue_weights must sum to 1.0, got {rw_sum:.3}"
            )));
        }
        Ok(())
    }
}

fn default_vendor_dictionary_path() -> PathBuf {
    PathBuf::from("config/vendors.toml")
}
fn default_keywords_path() -> PathBuf {
    PathBuf::from("config/keywords.toml")
}
fn default_forum_rate() -> f64 {
    0.5
}
fn default_min_engagement() -> u32 {
    3
}
fn default_window_hours() -> u32 {
    24
}
fn default_fallback_window_hours() -> u32 {
    168
}
fn default_fallback_threshold() -> usize {
    20
}
fn default_forum_base_url() -> String {
    "https://www.reddit.com".to_string()
}
fn default_results_per_query() -> u32 {
    10
}
fn default_date_restriction() -> String {
    "d7".to_string()
}
fn default_search_rate() -> f64 {
    1.0
}
fn default_vendor_query_limit() -> usize {
    5
}
fn default_search_base_url() -> String {
    "https://www.googleapis.com/customsearch/v1".to_string()
}
fn default_selector_k() -> usize {
    200
}
fn default_bucket_pct() -> BucketPct {
    BucketPct {
        critical: 0.4,
        engagement: 0.2,
        relevance: 0.3,
    }
}
fn d_engagement_upvotes() -> u32 {
    50
}
fn d_engagement_comments() -> u32 {
    20
}
fn d_engagement_min_total() -> f64 {
    4.0
}
fn d_relevance_min_total() -> f64 {
    7.0
}
fn default_llm_model() -> String {
    "gpt-4-turbo-preview".to_string()
}
fn default_llm_max_tokens() -> u32 {
    2000
}
fn default_llm_temperature() -> f64 {
    0.2
}
fn default_llm_timeout_sec() -> u64 {
    90
}
fn default_llm_daily_limit() -> u32 {
    20
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_excerpt_max_chars() -> usize {
    500
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_top_vendors() -> usize {
    20
}
fn default_global_timeout_sec() -> u64 {
    600
}
fn default_source_timeout_sec() -> u64 {
    120
}
fn default_request_timeout_sec() -> u64 {
    30
}
fn default_cache_enabled() -> bool {
    true
}
fn default_cache_ttl_hours() -> u32 {
    6
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn d_pricing_weight() -> f64 {
    1.0
}
fn d_pricing_cap() -> f64 {
    5.0
}
fn d_urgency_high_weight() -> f64 {
    2.0
}
fn d_urgency_high_cap() -> f64 {
    6.0
}
fn d_urgency_medium_weight() -> f64 {
    1.0
}
fn d_urgency_medium_cap() -> f64 {
    3.0
}
fn d_context_weight() -> f64 {
    0.5
}
fn d_context_cap() -> f64 {
    2.0
}
fn d_vendor_weight() -> f64 {
    1.5
}
fn d_vendor_cap() -> f64 {
    6.0
}
fn d_tier1_bonus() -> f64 {
    1.0
}
fn d_recency_24h() -> f64 {
    1.5
}
fn d_recency_7d() -> f64 {
    0.5
}
fn d_cloud_security_boost() -> f64 {
    3.0
}
fn d_cloud_security_vendor_boost() -> f64 {
    1.0
}
fn d_cloud_security_cap() -> f64 {
    4.0
}
fn d_ma_boost() -> f64 {
    3.0
}
fn d_ma_consolidator_boost() -> f64 {
    2.0
}
fn d_ma_enforcement_boost() -> f64 {
    1.5
}
fn d_ma_cap() -> f64 {
    6.5
}
fn d_partnership_boost() -> f64 {
    2.0
}
fn d_partner_tier_change_boost() -> f64 {
    4.0
}
fn d_business_relationship_boost() -> f64 {
    3.0
}
fn d_partnership_cap() -> f64 {
    8.0
}
fn d_msp_multiplier() -> f64 {
    1.5
}
fn d_medium_urgency_threshold() -> f64 {
    7.0
}
fn d_revenue_weights() -> RevenueWeights {
    RevenueWeights {
        immediate: 0.30,
        margin: 0.25,
        competitive: 0.20,
        strategic: 0.15,
        urgency: 0.10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_contractual() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.selector.k, 200);
        assert_eq!(cfg.llm.max_tokens, 2000);
        assert_eq!(cfg.sources.forum.window_hours, 24);
        assert_eq!(cfg.sources.forum.fallback_window_hours, 168);
        assert_eq!(cfg.report.excerpt_max_chars, 500);
        assert!((cfg.selector.bucket_pct.critical - 0.4).abs() < 1e-9);
        assert!(cfg.cache.enabled);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_toml_str("[selector]\nk = 10\nmystery = true\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn bucket_sum_validated() {
        let toml = r#"
[selector.bucket_pct]
critical = 0.8
engagement = 0.5
relevance = 0.3
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn scoring_overrides_apply() {
        let cfg = Config::from_toml_str("[scoring]\nmsp_multiplier = 2.0\n").unwrap();
        assert!((cfg.scoring.msp_multiplier - 2.0).abs() < 1e-9);
        // untouched constants keep their defaults
        assert!((cfg.scoring.pricing_cap - 5.0).abs() < 1e-9);
    }
}
