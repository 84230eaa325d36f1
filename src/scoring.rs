//! Pure relevance scorer.
//!
//! `score()` maps `(item, patterns, dictionary, constants)` to a `Score`
//! with no I/O, so the same inputs always produce the same output. All
//! numeric constants come in through `ScoringConfig`; nothing is hardcoded
//! at call sites.
//!
//! Component order matters: keyword + vendor + recency + boosts are summed,
//! the MSP multiplier is applied exactly once to that subtotal, urgency is
//! classified, and the weighted revenue-impact contribution lands last.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{RevenueWeights, ScoringConfig};
use crate::ingest::types::RawItem;
use crate::patterns::{categories as cat, PatternTable};
use crate::vendors::VendorDictionary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    #[default]
    Low,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::High => write!(f, "high"),
            Urgency::Medium => write!(f, "medium"),
            Urgency::Low => write!(f, "low"),
        }
    }
}

/// Five-axis revenue decomposition, each axis clamped to [0, 10].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueImpact {
    pub immediate: f64,
    pub margin: f64,
    pub competitive: f64,
    pub strategic: f64,
    pub urgency: f64,
}

impl RevenueImpact {
    pub fn weighted(&self, w: &RevenueWeights) -> f64 {
        self.immediate * w.immediate
            + self.margin * w.margin
            + self.competitive * w.competitive
            + self.strategic * w.strategic
            + self.urgency * w.urgency
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub total: f64,
    pub urgency: Urgency,
    /// category -> matched phrases, exactly as the pattern table reports.
    pub matched_terms: BTreeMap<String, Vec<String>>,
    pub vendors_detected: BTreeSet<String>,
    pub revenue_impact: RevenueImpact,
    /// Audit trail of boost additions and multipliers, e.g. `msp_context:x1.5`.
    pub multipliers_applied: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: RawItem,
    pub score: Score,
}

impl ScoredItem {
    /// Business-critical signal used by the selector's first bucket.
    pub fn is_business_critical(&self) -> bool {
        self.score.matched_terms.contains_key(cat::BUSINESS_IMPACT)
            || self.score.matched_terms.contains_key(cat::PARTNER_TIER_CHANGE)
            || self.score.matched_terms.contains_key(cat::MA_INTEL)
    }
}

fn capped(count: usize, weight: f64, cap: f64) -> f64 {
    (count as f64 * weight).min(cap)
}

pub fn score(
    item: &RawItem,
    patterns: &PatternTable,
    dict: &VendorDictionary,
    c: &ScoringConfig,
    now: DateTime<Utc>,
) -> Score {
    let text = item.full_text();
    let matched_terms = patterns.match_all(&text);
    let hits = |category: &str| matched_terms.get(category).map_or(0, Vec::len);
    let has = |category: &str| hits(category) > 0;

    let vendor_match = dict.match_text(&text);
    let vendors = vendor_match.vendors;

    let mut applied: Vec<String> = Vec::new();
    let mut subtotal = 0.0;

    // 1) Keyword score, capped per category.
    subtotal += capped(hits(cat::PRICING), c.pricing_weight, c.pricing_cap);
    subtotal += capped(hits(cat::URGENCY_HIGH), c.urgency_high_weight, c.urgency_high_cap);
    subtotal += capped(
        hits(cat::URGENCY_MEDIUM),
        c.urgency_medium_weight,
        c.urgency_medium_cap,
    );
    for context in [cat::SUPPLY, cat::STRATEGY, cat::TECHNOLOGY] {
        subtotal += capped(hits(context), c.context_weight, c.context_cap);
    }

    // 2) Vendor score: per distinct canonical, plus a one-time tier-1 bump.
    subtotal += (vendors.len() as f64 * c.vendor_weight).min(c.vendor_cap);
    let any_tier1 = vendors.iter().any(|v| dict.tier(v) == Some(1));
    if any_tier1 {
        subtotal += c.tier1_bonus;
    }

    // 3) Recency.
    let age = now.signed_duration_since(item.posted_at);
    if age <= Duration::hours(24) {
        subtotal += c.recency_24h;
    } else if age <= Duration::days(7) {
        subtotal += c.recency_7d;
    }

    // 4) Cloud-security platform boost: category + pricing signal together.
    let mut cloud_boost = 0.0;
    if has(cat::CLOUD_SECURITY) && has(cat::PRICING) {
        cloud_boost += c.cloud_security_boost;
        applied.push(format!("cloud_security:+{:.1}", c.cloud_security_boost));
        if vendors.iter().any(|v| dict.is_cloud_security(v)) {
            cloud_boost += c.cloud_security_vendor_boost;
            applied.push(format!(
                "cloud_security_vendor:+{:.1}",
                c.cloud_security_vendor_boost
            ));
        }
        cloud_boost = cloud_boost.min(c.cloud_security_cap);
    }
    subtotal += cloud_boost;

    // 5) M&A intelligence boost.
    let mut ma_boost = 0.0;
    let acquisition_vendor = vendors.iter().any(|v| dict.in_acquisition(v));
    if has(cat::MA_INTEL) && acquisition_vendor {
        ma_boost += c.ma_boost;
        applied.push(format!("ma_intel:+{:.1}", c.ma_boost));
        let consolidator_acquirer = vendors.iter().any(|v| {
            dict.is_consolidator(v)
                || dict.acquirers_of(v).iter().any(|a| dict.is_consolidator(a))
        });
        if consolidator_acquirer {
            ma_boost += c.ma_consolidator_boost;
            applied.push(format!("ma_consolidator:+{:.1}", c.ma_consolidator_boost));
        }
        if has(cat::LICENSE_ENFORCEMENT) {
            ma_boost += c.ma_enforcement_boost;
            applied.push(format!("ma_enforcement:+{:.1}", c.ma_enforcement_boost));
        }
        ma_boost = ma_boost.min(c.ma_cap);
    }
    subtotal += ma_boost;

    // 6) Partnership boost.
    let mut partnership_boost = 0.0;
    if has(cat::PARTNERSHIP) {
        partnership_boost += c.partnership_boost;
        applied.push(format!("partnership:+{:.1}", c.partnership_boost));
    }
    if has(cat::PARTNER_TIER_CHANGE) {
        partnership_boost += c.partner_tier_change_boost;
        applied.push(format!(
            "partner_tier_change:+{:.1}",
            c.partner_tier_change_boost
        ));
    }
    if has(cat::BUSINESS_RELATIONSHIP) {
        partnership_boost += c.business_relationship_boost;
        applied.push(format!(
            "business_relationship:+{:.1}",
            c.business_relationship_boost
        ));
    }
    partnership_boost = partnership_boost.min(c.partnership_cap);
    subtotal += partnership_boost;

    // 7) MSP context multiplies the subtotal exactly once, before urgency
    // and the revenue-impact contribution.
    if has(cat::MSP_CONTEXT) {
        subtotal *= c.msp_multiplier;
        applied.push(format!("msp_context:x{:.1}", c.msp_multiplier));
    }

    // 8) Urgency classification on the pre-revenue subtotal.
    let urgency = if has(cat::URGENCY_HIGH) || (has(cat::DEADLINE) && has(cat::SCALE)) {
        Urgency::High
    } else if has(cat::URGENCY_MEDIUM) || subtotal >= c.medium_urgency_threshold {
        Urgency::Medium
    } else {
        Urgency::Low
    };

    // 9) Revenue-impact axes.
    let engagement_factor = (item.engagement.score() as f64 / 50.0).min(2.0);
    let revenue_impact = RevenueImpact {
        immediate: (hits(cat::PRICING) as f64 * 2.0
            + hits(cat::URGENCY_HIGH) as f64 * 3.0
            + engagement_factor)
            .min(10.0),
        margin: (hits(cat::SUPPLY) as f64 * 2.0 + vendors.len() as f64 * 1.5 + cloud_boost)
            .min(10.0),
        competitive: (partnership_boost + ma_boost).min(10.0),
        strategic: ((hits(cat::STRATEGY) + hits(cat::TECHNOLOGY)) as f64 * 2.0).min(10.0),
        urgency: match urgency {
            Urgency::High => 10.0,
            Urgency::Medium => 5.0,
            Urgency::Low => 1.0,
        },
    };

    let total = (subtotal + revenue_impact.weighted(&c.revenue_weights)).max(0.0);

    Score {
        total,
        urgency,
        matched_terms,
        vendors_detected: vendors,
        revenue_impact,
        multipliers_applied: applied,
    }
}
