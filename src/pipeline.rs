//! Orchestrator: fetch concurrently, then score, select, synthesise and
//! assemble the report.
//!
//! One task per configured source, each with its own deadline; a failed or
//! timed-out source degrades the run instead of killing it. The run only
//! fails outright when every source comes back empty, when configuration is
//! broken, or when the caller cancels. Cancellation drops all in-flight
//! work, including the LLM call, and no artifacts are emitted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::PayloadCache;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::PipelineError;
use crate::ingest::forum::ForumFetcher;
use crate::ingest::search::SearchFetcher;
use crate::ingest::types::{RawItem, SourceFetcher};
use crate::ingest::{boundary_filter, dedup};
use crate::report::{Report, RunStats};
use crate::select::select;
use crate::summarize::client::{CachingLlmClient, DynLlmClient, OpenAiClient};
use crate::summarize::{bind_sources, Summarizer};
use crate::analytics::vendor_rollup;

pub struct Pipeline {
    cfg: Config,
    engine: Arc<Engine>,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    llm: DynLlmClient,
}

impl Pipeline {
    /// Wire everything from configuration: engine, cache, fetchers, LLM.
    pub fn from_config(cfg: Config) -> Result<Self, PipelineError> {
        let engine = Arc::new(Engine::from_config(&cfg)?);
        let cache = Arc::new(PayloadCache::new(
            &cfg.cache.dir.join("http"),
            cfg.cache.ttl_hours,
            cfg.cache.enabled,
        ));
        let request_timeout = Duration::from_secs(cfg.run.request_timeout_sec);
        let source_timeout = Duration::from_secs(cfg.run.source_timeout_sec);

        let mut fetchers: Vec<Arc<dyn SourceFetcher>> = Vec::new();
        if !cfg.sources.forum.sub_channels.is_empty() {
            let forum = ForumFetcher::new(
                cfg.sources.forum.clone(),
                request_timeout,
                source_timeout,
                Arc::clone(&cache),
                Arc::clone(&engine.dict),
            )
            .map_err(|e| PipelineError::Config(e.to_string()))?;
            fetchers.push(Arc::new(forum));
        }
        if !cfg.sources.search.queries.is_empty() {
            let search = SearchFetcher::new(
                cfg.sources.search.clone(),
                request_timeout,
                source_timeout,
                Arc::clone(&cache),
                Arc::clone(&engine.dict),
            )
            .map_err(|e| PipelineError::Config(e.to_string()))?;
            fetchers.push(Arc::new(search));
        }
        if fetchers.is_empty() {
            return Err(PipelineError::Config(
                "no sources configured: set sources.forum.sub_channels or sources.search.queries"
                    .into(),
            ));
        }

        let llm: DynLlmClient = Arc::new(CachingLlmClient::new(
            OpenAiClient::from_config(&cfg.llm),
            cfg.cache.dir.join("llm"),
            cfg.llm.daily_limit,
        ));

        Ok(Self {
            cfg,
            engine,
            fetchers,
            llm,
        })
    }

    /// Test hook: inject fetchers and an LLM client directly.
    pub fn with_parts(
        cfg: Config,
        engine: Arc<Engine>,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
        llm: DynLlmClient,
    ) -> Self {
        Self {
            cfg,
            engine,
            fetchers,
            llm,
        }
    }

    /// Run to completion or until `cancel` flips true. The report is
    /// returned, not written; artifact emission is the caller's move.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<Report, PipelineError> {
        if *cancel.borrow() {
            return Err(PipelineError::Cancelled);
        }
        let global = Duration::from_secs(self.cfg.run.global_timeout_sec);
        tokio::select! {
            _ = cancel.changed() => Err(PipelineError::Cancelled),
            outcome = tokio::time::timeout(global, self.run_inner()) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Internal(format!(
                    "global timeout of {}s exceeded",
                    self.cfg.run.global_timeout_sec
                ))),
            },
        }
    }

    async fn run_inner(&self) -> Result<Report, PipelineError> {
        let started = std::time::Instant::now();
        let now = Utc::now();

        // Fetch phase: one task per source. A JoinSet aborts whatever is
        // still in flight if the run itself is cancelled or times out.
        let mut tasks = tokio::task::JoinSet::new();
        for fetcher in &self.fetchers {
            let fetcher = Arc::clone(fetcher);
            tasks.spawn(async move {
                let name = fetcher.name();
                (name, fetcher.fetch().await)
            });
        }

        let mut all_items: Vec<RawItem> = Vec::new();
        let mut per_source: BTreeMap<String, usize> = BTreeMap::new();
        let mut partial_failures: Vec<String> = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let (name, outcome) = joined
                .map_err(|e| PipelineError::Internal(format!("fetch task panicked: {e}")))?;
            match outcome {
                Ok((items, stats)) => {
                    let (kept, discarded) = boundary_filter(items, now);
                    info!(
                        source = name,
                        fetched = kept.len(),
                        discarded,
                        retries = stats.retries,
                        cache_hits = stats.cache_hits,
                        "source complete"
                    );
                    if stats.timed_out {
                        partial_failures.push(format!("{name}: timed out, partial results kept"));
                    }
                    if stats.widened_window {
                        info!(source = name, "window fallback was used");
                    }
                    per_source.insert(name.to_string(), kept.len());
                    all_items.extend(kept);
                }
                Err(e) => {
                    warn!(source = name, error = %e, "source failed");
                    per_source.insert(name.to_string(), 0);
                    partial_failures.push(format!("{name}: {e}"));
                }
            }
        }

        if all_items.is_empty() {
            return Err(PipelineError::TotalFetchFailure);
        }

        // Single-threaded tail: dedup -> score -> select -> synthesise.
        let (unique, removed) = dedup(all_items);
        info!(unique = unique.len(), removed, "dedup complete");

        let scored = self.engine.score_all(unique, now);
        let selection = select(scored, &self.cfg.selector);
        info!(
            selected = selection.items.len(),
            critical = selection.buckets.critical,
            engagement = selection.buckets.engagement,
            relevance = selection.buckets.relevance,
            "selection complete"
        );

        let bindings = bind_sources(&selection.items);
        let summarizer = Summarizer::new(
            Arc::clone(&self.llm),
            self.cfg.report.excerpt_max_chars,
        );
        let summary = summarizer.summarize(&bindings, &self.engine.dict).await;
        if summary.llm_failed {
            warn!("llm synthesis failed; emitting report without insights");
        }

        let rollup = vendor_rollup(&selection.items, &self.engine.dict, self.cfg.report.top_vendors);

        let run_stats = RunStats {
            items_fetched_per_source: per_source,
            items_selected: selection.items.len(),
            buckets: selection.buckets,
            duration_ms: started.elapsed().as_millis() as u64,
            partial_failures,
            ..RunStats::default()
        };

        Ok(Report::assemble(now, summary, bindings, rollup, run_stats))
    }
}

/// Convenience pair for callers that want a cancel handle.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::ingest::content_hash;
    use crate::ingest::types::{Engagement, FetchStats, SourceKind};
    use crate::patterns::PatternTable;
    use crate::summarize::client::MockLlmClient;
    use crate::vendors::VendorDictionary;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

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

    struct FailingFetcher;

    #[async_trait]
    impl SourceFetcher for FailingFetcher {
        async fn fetch(&self) -> Result<(Vec<RawItem>, FetchStats), FetchError> {
            Err(FetchError::Permanent {
                src_name: "search".into(),
                detail: "auth".into(),
            })
        }
        fn name(&self) -> &'static str {
            "search"
        }
    }

    fn engine() -> Arc<Engine> {
        let patterns = PatternTable::from_toml_str(
            r#"
pricing = ["price increase"]
urgency_high = ["price increase"]
"#,
        )
        .unwrap();
        let dict = Arc::new(
            VendorDictionary::from_toml_str(
                r#"
[vendors.vmware]
tier = 1
"#,
            )
            .unwrap(),
        );
        Arc::new(Engine::from_parts(patterns, dict, Config::default().scoring))
    }

    fn forum_item(url: &str) -> RawItem {
        RawItem {
            source_kind: SourceKind::Forum,
            source_subchannel: "sysadmin".into(),
            title: "VMware price increase".into(),
            body: "Up 50% from $50 to $76.".into(),
            url: url.into(),
            posted_at: Utc::now() - ChronoDuration::hours(3),
            engagement: Engagement {
                upvotes: 120,
                comments: 47,
            },
            content_hash: content_hash("VMware price increase", "Up 50% from $50 to $76."),
        }
    }

    fn llm_ok() -> DynLlmClient {
        Arc::new(MockLlmClient::scripted(vec![
            r#"{"insights":[{"role":"pricing","text":"VMware +50% [SOURCE_ID:1]","claimed_priority":"alpha"}],"executive_summary":"up"}"#.into(),
        ]))
    }

    #[tokio::test]
    async fn partial_source_failure_still_reports() {
        let pipeline = Pipeline::with_parts(
            Config::default(),
            engine(),
            vec![
                Arc::new(StaticFetcher {
                    name: "forum",
                    items: vec![forum_item("https://f.example/a")],
                }),
                Arc::new(FailingFetcher),
            ],
            llm_ok(),
        );
        let (_tx, rx) = cancellation();
        let report = pipeline.run(rx).await.unwrap();
        assert_eq!(report.run_stats.partial_failures.len(), 1);
        assert_eq!(report.run_stats.items_fetched_per_source["search"], 0);
        assert_eq!(report.run_stats.items_fetched_per_source["forum"], 1);
        assert_eq!(report.sources.len(), 1);
        assert!(!report.run_stats.llm_failed);
    }

    #[tokio::test]
    async fn zero_items_is_total_fetch_failure() {
        let pipeline = Pipeline::with_parts(
            Config::default(),
            engine(),
            vec![Arc::new(FailingFetcher)],
            llm_ok(),
        );
        let (_tx, rx) = cancellation();
        let err = pipeline.run(rx).await.unwrap_err();
        assert!(matches!(err, PipelineError::TotalFetchFailure));
    }

    #[tokio::test]
    async fn cancellation_suppresses_the_report() {
        let pipeline = Pipeline::with_parts(
            Config::default(),
            engine(),
            vec![Arc::new(StaticFetcher {
                name: "forum",
                items: vec![forum_item("https://f.example/a")],
            })],
            llm_ok(),
        );
        let (tx, rx) = cancellation();
        tx.send(true).unwrap();
        let err = pipeline.run(rx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn duplicate_urls_collapse_across_sources() {
        let pipeline = Pipeline::with_parts(
            Config::default(),
            engine(),
            vec![
                Arc::new(StaticFetcher {
                    name: "forum",
                    items: vec![
                        forum_item("https://f.example/a?utm_source=feed"),
                        forum_item("https://f.example/a"),
                    ],
                }),
            ],
            llm_ok(),
        );
        let (_tx, rx) = cancellation();
        let report = pipeline.run(rx).await.unwrap();
        assert_eq!(report.sources.len(), 1);
    }

    #[tokio::test]
    async fn llm_failure_yields_honest_empty_report() {
        let pipeline = Pipeline::with_parts(
            Config::default(),
            engine(),
            vec![Arc::new(StaticFetcher {
                name: "forum",
                items: vec![forum_item("https://f.example/a")],
            })],
            Arc::new(MockLlmClient::scripted(vec![])),
        );
        let (_tx, rx) = cancellation();
        let report = pipeline.run(rx).await.unwrap();
        assert!(report.run_stats.llm_failed);
        assert!(report.insights_by_priority.is_empty());
    }
}
