//! Dictionary-level properties against the shipped config files.

use pricing_radar::patterns::PatternTable;
use pricing_radar::vendors::VendorDictionary;

fn dict() -> VendorDictionary {
    VendorDictionary::load_from(std::path::Path::new("config/vendors.toml"))
        .expect("shipped vendor dictionary loads")
}

#[test]
fn shipped_dictionary_is_valid() {
    let d = dict();
    assert!(d.canonicals().count() >= 30);
    assert!(!d.tier1_canonicals().is_empty());
}

#[test]
fn shipped_keywords_compile() {
    let table = PatternTable::load_from(std::path::Path::new("config/keywords.toml"))
        .expect("shipped keywords load");
    for core in [
        "pricing",
        "urgency_high",
        "urgency_medium",
        "supply",
        "strategy",
        "technology",
        "cloud_security",
        "ma_intel",
        "partnership",
        "msp_context",
        "business_impact",
    ] {
        assert!(
            table.category_names().any(|c| c == core),
            "missing core category {core}"
        );
    }
}

#[test]
fn no_substring_matches_inside_words() {
    let d = dict();
    // None of these contain a vendor as a whole word.
    for text in [
        "corel draw tutorials",
        "declination angles",
        "unsharpened pencils",
        "insightful commentary",
        "awsome (sic) typo",
    ] {
        let m = d.match_text(text);
        assert!(
            m.vendors.is_empty(),
            "`{text}` unexpectedly matched {:?}",
            m.vendors
        );
    }
}

#[test]
fn aliases_map_to_canonicals() {
    let d = dict();
    let m = d.match_text("We moved from ESXi to OpenShift and kept ZIA.");
    assert!(m.vendors.contains("vmware"));
    assert!(m.vendors.contains("red hat"));
    assert!(m.vendors.contains("zscaler"));
}

#[test]
fn acquisition_closure_holds() {
    let d = dict();
    // Mentioning only the target still detects the target...
    let m = d.match_text("Our VMware renewal tripled this year.");
    assert!(m.vendors.contains("vmware"));
    assert!(!m.vendors.contains("broadcom"));
    // ...and the chain exposes the acquirer for rollup co-credit.
    assert_eq!(d.acquisition_chain("vmware"), vec!["broadcom".to_string()]);
}

#[test]
fn tier_boost_ladder() {
    let d = dict();
    assert!((d.confidence_boost("microsoft") - 0.30).abs() < 1e-9);
    assert!((d.confidence_boost("zscaler") - 0.20).abs() < 1e-9);
    assert!((d.confidence_boost("sophos") - 0.10).abs() < 1e-9);
    assert!((d.confidence_boost("solarwinds") - 0.0).abs() < 1e-9);
}
