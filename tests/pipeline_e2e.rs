//! End-to-end pipeline runs over in-memory fetchers and a scripted LLM.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pricing_radar::config::Config;
use pricing_radar::engine::Engine;
use pricing_radar::error::{FetchError, PipelineError};
use pricing_radar::ingest::content_hash;
use pricing_radar::ingest::types::{Engagement, FetchStats, RawItem, SourceFetcher, SourceKind};
use pricing_radar::pipeline::{cancellation, Pipeline};
use pricing_radar::summarize::client::{DynLlmClient, MockLlmClient};
use pricing_radar::summarize::Priority;
use pricing_radar::patterns::PatternTable;
use pricing_radar::vendors::VendorDictionary;

struct StaticFetcher {
    name: &'static str,
    items: Vec<RawItem>,
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self) -> Result<(Vec<RawItem>, FetchStats), FetchError> {
        Ok((
            self.items.clone(),
            FetchStats {
                source: self.name.to_string(),
                fetched: self.items.len(),
                ..FetchStats::default()
            },
        ))
    }
    fn name(&self) -> &'static str {
        self.name
    }
}

struct EmptyFetcher(&'static str);

#[async_trait]
impl SourceFetcher for EmptyFetcher {
    async fn fetch(&self) -> Result<(Vec<RawItem>, FetchStats), FetchError> {
        Ok((Vec::new(), FetchStats::default()))
    }
    fn name(&self) -> &'static str {
        self.0
    }
}

fn engine() -> Arc<Engine> {
    let patterns =
        PatternTable::load_from(std::path::Path::new("config/keywords.toml")).unwrap();
    let dict = Arc::new(
        VendorDictionary::load_from(std::path::Path::new("config/vendors.toml")).unwrap(),
    );
    Arc::new(Engine::from_parts(patterns, dict, Config::default().scoring))
}

fn forum_item(url: &str, title: &str, body: &str, upvotes: u32, comments: u32) -> RawItem {
    RawItem {
        source_kind: SourceKind::Forum,
        source_subchannel: "sysadmin".into(),
        title: title.into(),
        body: body.into(),
        url: url.into(),
        posted_at: Utc::now() - Duration::hours(3),
        engagement: Engagement { upvotes, comments },
        content_hash: content_hash(title, body),
    }
}

fn vmware_post(url: &str) -> RawItem {
    forum_item(
        url,
        "VMware 50% core-licensing increase from $50 to $76",
        "Renewal quote shows an immediate price increase on every core.",
        120,
        47,
    )
}

fn llm_one_insight() -> DynLlmClient {
    Arc::new(MockLlmClient::scripted(vec![
        r#"{"insights":[{"role":"pricing","text":"VMware core licensing up 50%, $50 to $76 [SOURCE_ID:1]","claimed_priority":"alpha"}],"executive_summary":"Licensing repricing under way."}"#
            .into(),
    ]))
}

/// S1: one strong forum item end to end.
#[tokio::test]
async fn single_item_yields_alpha_insight_with_binding() {
    let pipeline = Pipeline::with_parts(
        Config::default(),
        engine(),
        vec![Arc::new(StaticFetcher {
            name: "forum",
            items: vec![vmware_post("https://forum.example/vmware")],
        })],
        llm_one_insight(),
    );
    let (_tx, rx) = cancellation();
    let report = pipeline.run(rx).await.unwrap();

    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].source_id, 1);
    let alpha = &report.insights_by_priority[&Priority::Alpha];
    assert_eq!(alpha.len(), 1);
    // the prompt-side marker is re-bound to a footnote + canonical URL
    assert!(alpha[0].text.contains("[1]"));
    assert!(!alpha[0].text.contains("SOURCE_ID"));
    assert_eq!(alpha[0].citations[&1], report.sources[0].url);
    assert!(alpha[0].cited_source_ids.contains(&1));
    let vmware = report
        .vendor_rollup
        .iter()
        .find(|r| r.vendor == "vmware")
        .expect("vmware in rollup");
    assert_eq!(vmware.mentions, 1);
    // acquisition co-credit for the acquirer
    let broadcom = report
        .vendor_rollup
        .iter()
        .find(|r| r.vendor == "broadcom")
        .expect("broadcom co-credited");
    assert!(broadcom.score > 0.0);
}

/// S2: same URL behind tracking params collapses to one source entry.
#[tokio::test]
async fn tracking_param_duplicates_collapse() {
    let pipeline = Pipeline::with_parts(
        Config::default(),
        engine(),
        vec![Arc::new(StaticFetcher {
            name: "forum",
            items: vec![
                vmware_post("https://forum.example/vmware?utm_source=weekly"),
                vmware_post("https://forum.example/vmware"),
            ],
        })],
        llm_one_insight(),
    );
    let (_tx, rx) = cancellation();
    let report = pipeline.run(rx).await.unwrap();
    assert_eq!(report.sources.len(), 1);
}

/// S3: zero items across all sources fails the run.
#[tokio::test]
async fn all_sources_empty_is_total_fetch_failure() {
    let pipeline = Pipeline::with_parts(
        Config::default(),
        engine(),
        vec![Arc::new(EmptyFetcher("forum")), Arc::new(EmptyFetcher("search"))],
        llm_one_insight(),
    );
    let (_tx, rx) = cancellation();
    let err = pipeline.run(rx).await.unwrap_err();
    assert!(matches!(err, PipelineError::TotalFetchFailure));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn artifact_written_once_and_never_overwritten() {
    let pipeline = Pipeline::with_parts(
        Config::default(),
        engine(),
        vec![Arc::new(StaticFetcher {
            name: "forum",
            items: vec![vmware_post("https://forum.example/vmware")],
        })],
        llm_one_insight(),
    );
    let (_tx, rx) = cancellation();
    let report = pipeline.run(rx).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = report.write_json(dir.path()).unwrap();
    assert!(path.exists());
    // serialize(parse(R)) == R
    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: pricing_radar::Report = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        serde_json::to_value(&parsed).unwrap(),
        serde_json::to_value(&report).unwrap()
    );
    // second write with the same timestamp must refuse
    assert!(report.write_json(dir.path()).is_err());
}

#[tokio::test]
async fn mixed_sources_report_per_source_counts() {
    let pipeline = Pipeline::with_parts(
        Config::default(),
        engine(),
        vec![
            Arc::new(StaticFetcher {
                name: "forum",
                items: vec![vmware_post("https://forum.example/vmware")],
            }),
            Arc::new(StaticFetcher {
                name: "search",
                items: vec![forum_item(
                    "https://news.example/msft",
                    "Microsoft 365 price update",
                    "E5 new pricing lands at +3% for enterprise agreements.",
                    0,
                    0,
                )],
            }),
        ],
        llm_one_insight(),
    );
    let (_tx, rx) = cancellation();
    let report = pipeline.run(rx).await.unwrap();
    assert_eq!(report.run_stats.items_fetched_per_source["forum"], 1);
    assert_eq!(report.run_stats.items_fetched_per_source["search"], 1);
    assert_eq!(report.run_stats.items_selected, 2);
    assert!(report.run_stats.duration_ms < 60_000);
}
