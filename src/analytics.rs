//! Vendor analytics over the selected set.
//!
//! Counts distinct items per canonical vendor, folds acquisition chains
//! (a target mention co-credits its acquirers at half weight), applies tier
//! weights and emits the top-N ranking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scoring::ScoredItem;
use crate::vendors::VendorDictionary;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VendorRollup {
    pub vendor: String,
    /// Items directly mentioning the vendor.
    pub mentions: usize,
    pub tier: u8,
    /// Direct mentions plus acquisition co-credit, tier-weighted.
    pub score: f64,
}

pub fn vendor_rollup(
    selected: &[ScoredItem],
    dict: &VendorDictionary,
    top_n: usize,
) -> Vec<VendorRollup> {
    let mut mentions: BTreeMap<String, usize> = BTreeMap::new();
    let mut credit: BTreeMap<String, f64> = BTreeMap::new();

    for item in selected {
        for vendor in &item.score.vendors_detected {
            *mentions.entry(vendor.clone()).or_insert(0) += 1;
            *credit.entry(vendor.clone()).or_insert(0.0) += 1.0;

            // Collapse the acquisition chain: acquirers absorb half credit
            // for target mentions, unless they are mentioned themselves.
            for acquirer in dict.acquisition_chain(vendor) {
                if !item.score.vendors_detected.contains(&acquirer) {
                    *credit.entry(acquirer).or_insert(0.0) += 0.5;
                }
            }
        }
    }

    let mut out: Vec<VendorRollup> = credit
        .into_iter()
        .map(|(vendor, c)| {
            let score = c * dict.tier_weight(&vendor);
            VendorRollup {
                mentions: mentions.get(&vendor).copied().unwrap_or(0),
                tier: dict.tier(&vendor).unwrap_or(4),
                score,
                vendor,
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.vendor.cmp(&b.vendor))
    });
    out.truncate(top_n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{Engagement, RawItem, SourceKind};
    use crate::scoring::{RevenueImpact, Score, Urgency};
    use chrono::{TimeZone, Utc};
    use std::collections::{BTreeMap as Map, BTreeSet};

    const VENDORS: &str = r#"
[vendors.broadcom]
tier = 1
consolidator = true

[vendors.vmware]
tier = 1

[vendors.zscaler]
tier = 2

[[acquisitions]]
acquirer = "broadcom"
target = "vmware"
"#;

    fn with_vendors(vendors: &[&str]) -> ScoredItem {
        ScoredItem {
            item: RawItem {
                source_kind: SourceKind::Forum,
                source_subchannel: "msp".into(),
                title: "t".into(),
                body: "b".into(),
                url: "https://example.com/x".into(),
                posted_at: Utc.timestamp_opt(0, 0).unwrap(),
                engagement: Engagement::default(),
                content_hash: "h".into(),
            },
            score: Score {
                total: 1.0,
                urgency: Urgency::Low,
                matched_terms: Map::new(),
                vendors_detected: vendors.iter().map(|v| v.to_string()).collect::<BTreeSet<_>>(),
                revenue_impact: RevenueImpact::default(),
                multipliers_applied: Vec::new(),
            },
        }
    }

    #[test]
    fn target_mention_co_credits_acquirer() {
        let dict = VendorDictionary::from_toml_str(VENDORS).unwrap();
        let rollup = vendor_rollup(&[with_vendors(&["vmware"])], &dict, 20);
        let broadcom = rollup.iter().find(|r| r.vendor == "broadcom").unwrap();
        assert_eq!(broadcom.mentions, 0);
        assert!((broadcom.score - 0.5 * 3.0).abs() < 1e-9);
        let vmware = rollup.iter().find(|r| r.vendor == "vmware").unwrap();
        assert_eq!(vmware.mentions, 1);
    }

    #[test]
    fn no_double_credit_when_both_mentioned() {
        let dict = VendorDictionary::from_toml_str(VENDORS).unwrap();
        let rollup = vendor_rollup(&[with_vendors(&["vmware", "broadcom"])], &dict, 20);
        let broadcom = rollup.iter().find(|r| r.vendor == "broadcom").unwrap();
        assert_eq!(broadcom.mentions, 1);
        assert!((broadcom.score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn tier_weight_ranks_vendors() {
        let dict = VendorDictionary::from_toml_str(VENDORS).unwrap();
        let items = vec![
            with_vendors(&["zscaler"]),
            with_vendors(&["zscaler"]),
            with_vendors(&["vmware"]),
        ];
        let rollup = vendor_rollup(&items, &dict, 20);
        // zscaler: 2 * 2.0 = 4.0; vmware: 1 * 3.0 = 3.0; broadcom: 0.5 * 3.0
        assert_eq!(rollup[0].vendor, "zscaler");
        assert_eq!(rollup[1].vendor, "vmware");
    }

    #[test]
    fn top_n_truncates() {
        let dict = VendorDictionary::from_toml_str(VENDORS).unwrap();
        let rollup = vendor_rollup(&[with_vendors(&["vmware", "zscaler"])], &dict, 1);
        assert_eq!(rollup.len(), 1);
    }
}
