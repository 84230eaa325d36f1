//! Priority-bucket selector.
//!
//! Fills up to `K` slots from the scored, deduplicated candidates in four
//! passes: business-critical, high-engagement-with-relevance, high-relevance,
//! then the best of the rest. Every pass walks the same deterministic
//! ordering: `0.7·total + 0.3·normalised_engagement`, ties broken by
//! `posted_at` (newer first) then `url` ascending. A loud but irrelevant
//! item can therefore never outrank a relevant one inside a bucket, and the
//! bucket hierarchy keeps it from jumping ahead across buckets.

use std::cmp::Ordering;

use crate::config::SelectorConfig;
use crate::scoring::ScoredItem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BucketCounts {
    pub critical: usize,
    pub engagement: usize,
    pub relevance: usize,
    pub remainder: usize,
}

pub struct Selection {
    pub items: Vec<ScoredItem>,
    pub buckets: BucketCounts,
}

/// Composite ordering key; `max_engagement` comes from the candidate set so
/// the normalisation is stable for a fixed input.
fn composite(item: &ScoredItem, max_engagement: u32) -> f64 {
    let norm = if max_engagement == 0 {
        0.0
    } else {
        f64::from(item.item.engagement.score()) / f64::from(max_engagement)
    };
    0.7 * item.score.total + 0.3 * norm
}

fn rank_cmp(a: &ScoredItem, b: &ScoredItem, max_engagement: u32) -> Ordering {
    composite(b, max_engagement)
        .total_cmp(&composite(a, max_engagement))
        .then_with(|| b.item.posted_at.cmp(&a.item.posted_at))
        .then_with(|| a.item.url.cmp(&b.item.url))
}

pub fn select(mut candidates: Vec<ScoredItem>, cfg: &SelectorConfig) -> Selection {
    let max_engagement = candidates
        .iter()
        .map(|i| i.item.engagement.score())
        .max()
        .unwrap_or(0);

    candidates.sort_by(|a, b| rank_cmp(a, b, max_engagement));

    let k = cfg.k;
    let cap_critical = (k as f64 * cfg.bucket_pct.critical).floor() as usize;
    let cap_engagement = (k as f64 * cfg.bucket_pct.engagement).floor() as usize;
    let cap_relevance = (k as f64 * cfg.bucket_pct.relevance).floor() as usize;

    let is_engaged = |it: &ScoredItem| {
        (it.item.engagement.upvotes >= cfg.engagement_upvotes
            || it.item.engagement.comments >= cfg.engagement_comments)
            && it.score.total >= cfg.engagement_min_total
    };
    let is_relevant = |it: &ScoredItem| it.score.total >= cfg.relevance_min_total;

    let mut taken = vec![false; candidates.len()];
    let mut picked: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut buckets = BucketCounts::default();

    // Pass 1: business-critical.
    for (idx, it) in candidates.iter().enumerate() {
        if buckets.critical >= cap_critical || picked.len() >= k {
            break;
        }
        if !taken[idx] && it.is_business_critical() {
            taken[idx] = true;
            picked.push(idx);
            buckets.critical += 1;
        }
    }

    // Pass 2: high engagement backed by relevance.
    for (idx, it) in candidates.iter().enumerate() {
        if buckets.engagement >= cap_engagement || picked.len() >= k {
            break;
        }
        if !taken[idx] && is_engaged(it) {
            taken[idx] = true;
            picked.push(idx);
            buckets.engagement += 1;
        }
    }

    // Pass 3: high relevance.
    for (idx, it) in candidates.iter().enumerate() {
        if buckets.relevance >= cap_relevance || picked.len() >= k {
            break;
        }
        if !taken[idx] && is_relevant(it) {
            taken[idx] = true;
            picked.push(idx);
            buckets.relevance += 1;
        }
    }

    // Pass 4: best of the rest until K.
    for (idx, _) in candidates.iter().enumerate() {
        if picked.len() >= k {
            break;
        }
        if !taken[idx] {
            taken[idx] = true;
            picked.push(idx);
            buckets.remainder += 1;
        }
    }

    // Materialise in pick order without cloning.
    let mut slots: Vec<Option<ScoredItem>> = candidates.into_iter().map(Some).collect();
    let items = picked
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect();

    Selection { items, buckets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ingest::types::{Engagement, RawItem, SourceKind};
    use crate::scoring::{RevenueImpact, Score, Urgency};
    use chrono::{TimeZone, Utc};
    use std::collections::{BTreeMap, BTreeSet};

    fn scored(url: &str, total: f64, upvotes: u32, critical: bool) -> ScoredItem {
        let mut matched_terms: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if critical {
            matched_terms.insert("business_impact".into(), vec!["margin impact".into()]);
        }
        ScoredItem {
            item: RawItem {
                source_kind: SourceKind::Forum,
                source_subchannel: "msp".into(),
                title: "t".into(),
                body: "b".into(),
                url: url.into(),
                posted_at: Utc.timestamp_opt(1_000_000, 0).unwrap(),
                engagement: Engagement {
                    upvotes,
                    comments: 0,
                },
                content_hash: url.into(),
            },
            score: Score {
                total,
                urgency: Urgency::Low,
                matched_terms,
                vendors_detected: BTreeSet::new(),
                revenue_impact: RevenueImpact::default(),
                multipliers_applied: Vec::new(),
            },
        }
    }

    #[test]
    fn critical_items_fill_first_bucket() {
        let cfg = Config::default().selector;
        let sel = select(
            vec![
                scored("https://a", 1.0, 0, true),
                scored("https://b", 9.0, 0, false),
            ],
            &cfg,
        );
        assert_eq!(sel.buckets.critical, 1);
        assert_eq!(sel.items[0].item.url, "https://a");
    }

    #[test]
    fn loud_irrelevant_never_beats_relevant_in_bucket() {
        let mut cfg = Config::default().selector;
        cfg.k = 2;
        // Both land in the remainder bucket; the high-relevance moderate
        // engagement item must rank above the low-relevance loud one.
        let loud = scored("https://loud", 1.0, 500, false);
        let relevant = scored("https://relevant", 8.5, 30, false);
        let sel = select(vec![loud, relevant], &cfg);
        // relevant qualifies for the relevance bucket, loud does not
        assert_eq!(sel.items[0].item.url, "https://relevant");
    }

    #[test]
    fn composite_ordering_is_non_increasing_within_buckets() {
        let cfg = Config::default().selector;
        let items: Vec<ScoredItem> = (0..40)
            .map(|i| {
                scored(
                    &format!("https://x/{i}"),
                    (i % 10) as f64,
                    (i * 7 % 300) as u32,
                    false,
                )
            })
            .collect();
        let max_eng = items.iter().map(|i| i.item.engagement.score()).max().unwrap();
        let sel = select(items, &cfg);
        // verify ordering inside each contiguous bucket segment
        let b = sel.buckets;
        let mut bounds = vec![0, b.critical];
        bounds.push(bounds[1] + b.engagement);
        bounds.push(bounds[2] + b.relevance);
        bounds.push(bounds[3] + b.remainder);
        for w in bounds.windows(2) {
            let seg = &sel.items[w[0]..w[1]];
            for pair in seg.windows(2) {
                assert!(
                    composite(&pair[0], max_eng) >= composite(&pair[1], max_eng),
                    "ordering violated"
                );
            }
        }
    }

    #[test]
    fn capacity_is_respected() {
        let mut cfg = Config::default().selector;
        cfg.k = 10;
        let items: Vec<ScoredItem> = (0..50)
            .map(|i| scored(&format!("https://x/{i}"), 8.0, 0, i % 2 == 0))
            .collect();
        let sel = select(items, &cfg);
        assert_eq!(sel.items.len(), 10);
        // 40% of 10 = 4 critical slots
        assert_eq!(sel.buckets.critical, 4);
    }

    #[test]
    fn url_breaks_exact_ties() {
        let mut cfg = Config::default().selector;
        cfg.k = 3;
        let sel = select(
            vec![
                scored("https://b", 5.0, 0, false),
                scored("https://a", 5.0, 0, false),
            ],
            &cfg,
        );
        assert_eq!(sel.items[0].item.url, "https://a");
    }
}
