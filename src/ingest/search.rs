// src/ingest/search.rs
//! Web-search fetcher.
//!
//! Speaks a CSE-shaped JSON API. Configured queries may carry a `{year}`
//! token, substituted at fetch time; on top of those, the fetcher expands
//! vendor-specific pricing queries for the leading tier-1 vendors so a quiet
//! news day still probes the vendors that matter. Result URLs are
//! canonicalised before the merge so the same article behind different
//! tracking params collapses to one item.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, DateTime, Utc};
use metrics::histogram;
use serde::Deserialize;
use tracing::warn;

use crate::cache::PayloadCache;
use crate::config::SearchConfig;
use crate::error::FetchError;
use crate::ingest::types::{FetchStats, RawItem, SourceFetcher, SourceKind};
use crate::ingest::{content_hash, fetch_text, normalize_text, normalize_url, RateLimiter};
use crate::vendors::VendorDictionary;

const VENDOR_QUERY_TEMPLATES: &[&str] = &["{vendor} price increase", "{vendor} licensing change"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    title: String,
    #[serde(default)]
    snippet: String,
    link: String,
    #[serde(default)]
    pagemap: Option<PageMap>,
}

#[derive(Debug, Deserialize)]
struct PageMap {
    #[serde(default)]
    metatags: Vec<MetaTags>,
}

#[derive(Debug, Deserialize)]
struct MetaTags {
    #[serde(rename = "article:published_time")]
    published_time: Option<String>,
}

pub struct SearchFetcher {
    cfg: SearchConfig,
    http: reqwest::Client,
    limiter: RateLimiter,
    cache: Arc<PayloadCache>,
    dict: Arc<VendorDictionary>,
    base: url::Url,
    api_key: String,
    cx: String,
    source_timeout: Duration,
}

impl SearchFetcher {
    pub fn new(
        cfg: SearchConfig,
        request_timeout: Duration,
        source_timeout: Duration,
        cache: Arc<PayloadCache>,
        dict: Arc<VendorDictionary>,
    ) -> Result<Self, FetchError> {
        let api_key = std::env::var("SEARCH_API_KEY").unwrap_or_default();
        let cx = std::env::var("SEARCH_CX").unwrap_or_default();
        let http = reqwest::Client::builder()
            .user_agent("pricing-radar/0.1 (batch pricing intelligence)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Permanent {
                src_name: "search".into(),
                detail: format!("http client: {e}"),
            })?;
        let limiter = RateLimiter::new(cfg.rate_per_sec);
        let base = url::Url::parse(&cfg.base_url).map_err(|e| FetchError::Permanent {
            src_name: "search".into(),
            detail: format!("base_url: {e}"),
        })?;
        Ok(Self {
            cfg,
            http,
            limiter,
            cache,
            dict,
            base,
            api_key,
            cx,
            source_timeout,
        })
    }

    /// Configured queries with `{year}` substituted, plus vendor expansions.
    pub fn effective_queries(cfg: &SearchConfig, dict: &VendorDictionary, year: i32) -> Vec<String> {
        let mut out: Vec<String> = cfg
            .queries
            .iter()
            .map(|q| q.replace("{year}", &year.to_string()))
            .collect();
        for vendor in dict.tier1_canonicals().into_iter().take(cfg.vendor_query_limit) {
            for template in VENDOR_QUERY_TEMPLATES {
                out.push(template.replace("{vendor}", vendor));
            }
        }
        out.dedup();
        out
    }

    fn request_url(&self, query: &str) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("cx", &self.cx)
            .append_pair("q", query)
            .append_pair("num", &self.cfg.results_per_query.to_string())
            .append_pair("dateRestrict", &self.cfg.date_restriction)
            .append_pair("sort", "date:d");
        url.to_string()
    }
}

/// Parse one search payload. Articles with no parseable publication date are
/// stamped `now`; engagement is always zero for search results.
pub fn parse_search_response(
    payload: &str,
    query: &str,
    now: DateTime<Utc>,
) -> Result<Vec<RawItem>, FetchError> {
    let t0 = std::time::Instant::now();
    let resp: SearchResponse = serde_json::from_str(payload).map_err(|e| FetchError::Permanent {
        src_name: "search".into(),
        detail: format!("search schema drift: {e}"),
    })?;

    let mut out = Vec::with_capacity(resp.items.len());
    for item in resp.items {
        let posted_at = item
            .pagemap
            .as_ref()
            .and_then(|p| p.metatags.first())
            .and_then(|m| m.published_time.as_deref())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        let title = normalize_text(&item.title);
        let body = normalize_text(&item.snippet);
        out.push(RawItem {
            source_kind: SourceKind::Search,
            source_subchannel: query.to_string(),
            content_hash: content_hash(&title, &body),
            url: normalize_url(&item.link),
            title,
            body,
            posted_at,
            engagement: Default::default(),
        });
    }
    histogram!("fetch_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

#[async_trait]
impl SourceFetcher for SearchFetcher {
    async fn fetch(&self) -> Result<(Vec<RawItem>, FetchStats), FetchError> {
        if self.api_key.is_empty() || self.cx.is_empty() {
            return Err(FetchError::Permanent {
                src_name: "search".into(),
                detail: "SEARCH_API_KEY / SEARCH_CX not set".into(),
            });
        }

        let mut stats = FetchStats {
            source: "search".into(),
            ..FetchStats::default()
        };

        let now = Utc::now();
        let queries = Self::effective_queries(&self.cfg, &self.dict, now.year());

        let mut merged: Vec<RawItem> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut hard_failure: Option<FetchError> = None;
        let deadline = tokio::time::Instant::now() + self.source_timeout;

        for query in &queries {
            if tokio::time::Instant::now() >= deadline {
                warn!(query = %query, "source deadline hit, keeping partial results");
                stats.timed_out = true;
                break;
            }
            let url = self.request_url(query);
            let payload = match fetch_text(
                &self.http,
                &self.limiter,
                &self.cache,
                "search",
                &url,
                &mut stats,
            )
            .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(query = %query, error = %e, "search query failed");
                    hard_failure = Some(e);
                    continue;
                }
            };
            match parse_search_response(&payload, query, now) {
                Ok(items) => {
                    for item in items {
                        if seen.insert(item.url.clone()) {
                            merged.push(item);
                        } else {
                            stats.discarded += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "search parse failed");
                    hard_failure = Some(e);
                }
            }
        }

        if merged.is_empty() {
            if let Some(e) = hard_failure {
                return Err(e);
            }
        }

        stats.fetched = merged.len();
        metrics::counter!("fetch_items_total").increment(merged.len() as u64);
        Ok((merged, stats))
    }

    fn name(&self) -> &'static str {
        "search"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendors::VendorDictionary;
    use chrono::TimeZone;

    const FIXTURE: &str = r#"{
      "items": [
        {"title": "Vendor raises enterprise prices 12%",
         "snippet": "The increase lands next quarter...",
         "link": "https://News.example.com/story?id=9&utm_source=feed",
         "pagemap": {"metatags": [{"article:published_time": "2023-11-14T10:00:00Z"}]}},
        {"title": "Undated piece", "snippet": "",
         "link": "https://news.example.com/other"}
      ]
    }"#;

    #[test]
    fn parse_search_normalises_urls_and_dates() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let items = parse_search_response(FIXTURE, "enterprise pricing 2023", now).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://news.example.com/story?id=9");
        assert_eq!(items[0].posted_at.timestamp(), 1_699_956_000);
        assert_eq!(items[1].posted_at, now);
        assert!(items[1].body.is_empty());
        assert_eq!(items[0].source_subchannel, "enterprise pricing 2023");
    }

    #[test]
    fn effective_queries_template_year_and_vendors() {
        let dict = VendorDictionary::from_toml_str(
            r#"
[vendors.broadcom]
tier = 1

[vendors.smallco]
tier = 3
"#,
        )
        .unwrap();
        let cfg = SearchConfig {
            queries: vec!["enterprise software pricing increase {year}".into()],
            ..crate::config::SearchConfig::default()
        };
        let queries = SearchFetcher::effective_queries(&cfg, &dict, 2026);
        assert!(queries.contains(&"enterprise software pricing increase 2026".to_string()));
        assert!(queries.contains(&"broadcom price increase".to_string()));
        assert!(!queries.iter().any(|q| q.contains("smallco")));
    }
}
