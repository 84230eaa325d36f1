// src/ingest/forum.rs
//! Forum fetcher.
//!
//! Speaks a Reddit-shaped listing API: `{base}/r/{sub}/{listing}.json`.
//! Each configured sub-channel is queried across four listings and merged by
//! post id. Items outside the configured window are dropped; if the yield
//! falls under the fallback threshold the window widens once to the fallback
//! width. Low-engagement posts are discarded unless a tier-1 vendor shows up
//! in the title.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::histogram;
use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::PayloadCache;
use crate::config::ForumConfig;
use crate::error::FetchError;
use crate::ingest::types::{Engagement, FetchStats, RawItem, SourceFetcher, SourceKind};
use crate::ingest::{content_hash, fetch_text, normalize_text, RateLimiter};
use crate::vendors::VendorDictionary;

const LISTINGS: &[&str] = &["hot", "new", "top", "rising"];
const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    #[serde(default)]
    selftext: String,
    permalink: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u32,
    created_utc: f64,
    subreddit: String,
}

pub struct ForumFetcher {
    cfg: ForumConfig,
    http: reqwest::Client,
    limiter: RateLimiter,
    cache: Arc<PayloadCache>,
    dict: Arc<VendorDictionary>,
    source_timeout: Duration,
}

impl ForumFetcher {
    pub fn new(
        cfg: ForumConfig,
        request_timeout: Duration,
        source_timeout: Duration,
        cache: Arc<PayloadCache>,
        dict: Arc<VendorDictionary>,
    ) -> Result<Self, FetchError> {
        let user_agent = std::env::var("FORUM_USER_AGENT")
            .unwrap_or_else(|_| "pricing-radar/0.1 (batch pricing intelligence)".to_string());
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4))
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Permanent {
                src_name: "forum".into(),
                detail: format!("http client: {e}"),
            })?;
        let limiter = RateLimiter::new(cfg.rate_per_sec);
        Ok(Self {
            cfg,
            http,
            limiter,
            cache,
            dict,
            source_timeout,
        })
    }

    fn listing_url(&self, sub: &str, listing: &str) -> String {
        format!(
            "{}/r/{}/{}.json?limit={}",
            self.cfg.base_url.trim_end_matches('/'),
            sub,
            listing,
            PAGE_LIMIT
        )
    }

    /// Engagement floor, with a tier-1 title override: posts about vendors
    /// that always matter survive even when quiet.
    fn passes_quality(&self, item: &RawItem) -> bool {
        if item.engagement.upvotes >= self.cfg.min_upvotes
            || item.engagement.comments >= self.cfg.min_comments
        {
            return true;
        }
        self.dict.tier1_mentioned(&item.title)
    }

    fn within(items: &[RawItem], now: DateTime<Utc>, hours: u32) -> Vec<RawItem> {
        let cutoff = now - chrono::Duration::hours(i64::from(hours));
        items
            .iter()
            .filter(|i| i.posted_at >= cutoff)
            .cloned()
            .collect()
    }
}

/// Parse one listing payload into raw items. Split out so fixture payloads
/// exercise the exact production path.
pub fn parse_listing(payload: &str, base_url: &str) -> Result<Vec<RawItem>, FetchError> {
    let t0 = std::time::Instant::now();
    let listing: Listing = serde_json::from_str(payload).map_err(|e| FetchError::Permanent {
        src_name: "forum".into(),
        detail: format!("listing schema drift: {e}"),
    })?;

    let mut out = Vec::with_capacity(listing.data.children.len());
    for child in listing.data.children {
        let post = child.data;
        if post.selftext == "[removed]" || post.selftext == "[deleted]" {
            continue;
        }
        let title = normalize_text(&post.title);
        let body = normalize_text(&post.selftext);
        let posted_at = Utc
            .timestamp_opt(post.created_utc as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);
        out.push(RawItem {
            source_kind: SourceKind::Forum,
            source_subchannel: post.subreddit,
            content_hash: content_hash(&title, &body),
            url: format!("{}{}", base_url.trim_end_matches('/'), post.permalink),
            title,
            body,
            posted_at,
            engagement: Engagement {
                upvotes: u32::try_from(post.score.max(0)).unwrap_or(0),
                comments: post.num_comments,
            },
        });
    }
    histogram!("fetch_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

#[async_trait]
impl SourceFetcher for ForumFetcher {
    async fn fetch(&self) -> Result<(Vec<RawItem>, FetchStats), FetchError> {
        let mut stats = FetchStats {
            source: "forum".into(),
            ..FetchStats::default()
        };

        let mut merged: Vec<RawItem> = Vec::new();
        let mut seen_urls: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut hard_failure: Option<FetchError> = None;
        let deadline = tokio::time::Instant::now() + self.source_timeout;

        'subs: for sub in &self.cfg.sub_channels {
            for listing in LISTINGS {
                if tokio::time::Instant::now() >= deadline {
                    warn!(sub = %sub, "source deadline hit, keeping partial results");
                    stats.timed_out = true;
                    break 'subs;
                }
                let url = self.listing_url(sub, listing);
                let payload = match fetch_text(
                    &self.http,
                    &self.limiter,
                    &self.cache,
                    "forum",
                    &url,
                    &mut stats,
                )
                .await
                {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(sub = %sub, listing = %listing, error = %e, "listing fetch failed");
                        hard_failure = Some(e);
                        continue;
                    }
                };
                match parse_listing(&payload, &self.cfg.base_url) {
                    Ok(items) => {
                        for item in items {
                            if seen_urls.insert(item.url.clone()) {
                                merged.push(item);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(sub = %sub, listing = %listing, error = %e, "listing parse failed");
                        hard_failure = Some(e);
                    }
                }
            }
        }

        // Everything failed and nothing was collected: surface the error so
        // the orchestrator records the source as failed.
        if merged.is_empty() {
            if let Some(e) = hard_failure {
                return Err(e);
            }
        }

        let now = Utc::now();
        let mut windowed = Self::within(&merged, now, self.cfg.window_hours);
        if windowed.len() < self.cfg.fallback_threshold {
            info!(
                kept = windowed.len(),
                threshold = self.cfg.fallback_threshold,
                "thin window, widening to fallback"
            );
            stats.widened_window = true;
            windowed = Self::within(&merged, now, self.cfg.fallback_window_hours);
        }

        let before = windowed.len();
        let kept: Vec<RawItem> = windowed
            .into_iter()
            .filter(|i| self.passes_quality(i))
            .collect();
        stats.discarded += before - kept.len();
        stats.fetched = kept.len();

        metrics::counter!("fetch_items_total").increment(kept.len() as u64);
        Ok((kept, stats))
    }

    fn name(&self) -> &'static str {
        "forum"
    }
}
