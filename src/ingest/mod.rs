// src/ingest/mod.rs
pub mod forum;
pub mod search;
pub mod types;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use url::Url;

use crate::ingest::types::RawItem;

/// One-time metrics registration (so series show up on a host recorder).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_items_total", "Items parsed from source APIs.");
        describe_counter!(
            "fetch_discarded_total",
            "Items dropped at the fetch boundary (empty url/body, no engagement)."
        );
        describe_counter!("fetch_requests_total", "Outbound HTTP requests.");
        describe_counter!("fetch_retries_total", "Retried HTTP requests.");
        describe_counter!("dedup_removed_total", "Items collapsed by deduplication.");
        describe_counter!(
            "pattern_compile_fallback_total",
            "Keyword phrases degraded to substring matching."
        );
        describe_histogram!("fetch_parse_ms", "Source response parse time in ms.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "mc_cid",
    "mc_eid",
    "ref",
    "ref_source",
];

/// Canonicalise a URL: lowercase scheme/host, drop tracking params and
/// fragments, trim a trailing slash. Unparseable input comes back trimmed
/// so it still works as an exact-match key.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut qp = url.query_pairs_mut();
        qp.clear();
        for (k, v) in &kept {
            qp.append_pair(k, v);
        }
        drop(qp);
    }
    if let Some(host) = url.host_str().map(str::to_lowercase) {
        let _ = url.set_host(Some(&host));
    }
    let mut s = url.to_string();
    if s.ends_with('/') && url.path() == "/" && url.query().is_none() {
        s.pop();
    }
    s
}

/// Stable content hash over normalised title+body.
pub fn content_hash(title: &str, body: &str) -> String {
    let norm = format!("{}\n{}", normalize_text(title), normalize_text(body)).to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(norm.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// Fetch-boundary hygiene: empty URLs are unusable, zero-engagement empty
/// bodies carry no signal, future timestamps are clamped to `now`.
pub fn boundary_filter(items: Vec<RawItem>, now: DateTime<Utc>) -> (Vec<RawItem>, usize) {
    ensure_metrics_described();
    let mut kept = Vec::with_capacity(items.len());
    let mut discarded = 0usize;
    for mut item in items {
        if item.url.trim().is_empty() || (item.engagement.is_zero() && item.body.is_empty()) {
            discarded += 1;
            continue;
        }
        if item.posted_at > now {
            item.posted_at = now;
        }
        kept.push(item);
    }
    counter!("fetch_discarded_total").increment(discarded as u64);
    (kept, discarded)
}

/// Collapse near-duplicates. Primary key is the normalised URL; items with
/// no usable URL group by content hash. Within a group the highest
/// engagement survives, then the newest. Output preserves first-appearance
/// order of the surviving groups.
pub fn dedup(items: Vec<RawItem>) -> (Vec<RawItem>, usize) {
    ensure_metrics_described();
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, RawItem> = HashMap::new();
    let mut removed = 0usize;

    for item in items {
        let norm = normalize_url(&item.url);
        let key = if norm.is_empty() {
            format!("hash:{}", item.content_hash)
        } else {
            format!("url:{norm}")
        };
        match best.get_mut(&key) {
            None => {
                order.push(key.clone());
                best.insert(key, item);
            }
            Some(existing) => {
                removed += 1;
                let replace = item.engagement.score() > existing.engagement.score()
                    || (item.engagement.score() == existing.engagement.score()
                        && item.posted_at > existing.posted_at);
                if replace {
                    *existing = item;
                }
            }
        }
    }

    counter!("dedup_removed_total").increment(removed as u64);
    let out = order
        .into_iter()
        .filter_map(|k| best.remove(&k))
        .collect::<Vec<_>>();
    (out, removed)
}

/// Exponential backoff with deterministic jitter: base * 2^attempt plus a
/// hash-derived fraction of the base, so retries spread without pulling in a
/// randomness dependency.
pub fn backoff_delay(attempt: u32, base_ms: u64, salt: &str) -> std::time::Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(6));
    let mut h = std::collections::hash_map::DefaultHasher::new();
    salt.hash(&mut h);
    attempt.hash(&mut h);
    let jitter = h.finish() % base_ms.max(1);
    std::time::Duration::from_millis(exp + jitter)
}

/// Minimal token-interval rate limiter: at most `rate_per_sec` acquisitions
/// per second, enforced by sleeping the remainder of the interval.
pub struct RateLimiter {
    interval: std::time::Duration,
    last: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64) -> Self {
        let interval = std::time::Duration::from_secs_f64(1.0 / rate_per_sec.max(0.001));
        Self {
            interval,
            last: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        let now = tokio::time::Instant::now();
        if let Some(prev) = *last {
            let next = prev + self.interval;
            if next > now {
                tokio::time::sleep_until(next).await;
            }
        }
        *last = Some(tokio::time::Instant::now());
    }
}

/// Shared GET with cache, rate limiting and bounded retries. Transient
/// failures (network, 5xx, 429) retry up to `MAX_ATTEMPTS` with exponential
/// backoff; other 4xx surface immediately as permanent.
pub(crate) async fn fetch_text(
    http: &reqwest::Client,
    limiter: &RateLimiter,
    cache: &crate::cache::PayloadCache,
    source: &'static str,
    url: &str,
    stats: &mut crate::ingest::types::FetchStats,
) -> Result<String, crate::error::FetchError> {
    use crate::error::FetchError;

    const MAX_ATTEMPTS: u32 = 4;
    const BACKOFF_BASE_MS: u64 = 250;

    ensure_metrics_described();

    if let Some(hit) = cache.get(url, Utc::now()) {
        stats.cache_hits += 1;
        return Ok(hit);
    }

    let mut last_detail = String::new();
    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            stats.retries += 1;
            counter!("fetch_retries_total").increment(1);
            tokio::time::sleep(backoff_delay(attempt, BACKOFF_BASE_MS, url)).await;
        }
        limiter.acquire().await;
        stats.requests += 1;
        counter!("fetch_requests_total").increment(1);

        match http.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let body = resp.text().await.map_err(|e| FetchError::Transient {
                        src_name: source.to_string(),
                        detail: e.to_string(),
                    })?;
                    cache.put(url, &body, Utc::now());
                    return Ok(body);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    last_detail = format!("HTTP {status}");
                    continue;
                }
                return Err(FetchError::Permanent {
                    src_name: source.to_string(),
                    detail: format!("HTTP {status}"),
                });
            }
            Err(e) => {
                last_detail = e.to_string();
                continue;
            }
        }
    }

    Err(FetchError::Transient {
        src_name: source.to_string(),
        detail: format!("gave up after {MAX_ATTEMPTS} attempts: {last_detail}"),
    })
}
