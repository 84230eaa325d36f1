// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Forum,
    Search,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Forum => write!(f, "forum"),
            SourceKind::Search => write!(f, "search"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub upvotes: u32,
    pub comments: u32,
}

impl Engagement {
    /// Composite engagement signal: comments weigh double.
    pub fn score(&self) -> u32 {
        self.upvotes + self.comments * 2
    }

    pub fn is_zero(&self) -> bool {
        self.upvotes == 0 && self.comments == 0
    }
}

/// One post or article as it leaves a fetcher. HTML is already stripped,
/// whitespace collapsed, URL canonicalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source_kind: SourceKind,
    /// Forum sub-name or the search query that produced the item.
    pub source_subchannel: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement: Engagement,
    /// sha256 over normalised title+body; secondary dedup key.
    pub content_hash: String,
}

impl RawItem {
    pub fn full_text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

/// Per-source bookkeeping returned alongside the items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchStats {
    pub source: String,
    pub fetched: usize,
    pub discarded: usize,
    pub requests: u32,
    pub retries: u32,
    pub cache_hits: u32,
    /// Window fallback engaged (forum only).
    pub widened_window: bool,
    /// The per-source deadline expired; the items returned are partial.
    pub timed_out: bool,
}

/// A source of raw items. One implementation per upstream API; tests plug in
/// deterministic in-memory fetchers.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self) -> Result<(Vec<RawItem>, FetchStats), FetchError>;
    fn name(&self) -> &'static str;
}
