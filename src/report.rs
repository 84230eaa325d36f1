//! Report assembly and artifact output.
//!
//! The `Report` is the typed hand-off to the external HTML renderer and the
//! JSON sink. Serialisation is stable (struct field order plus `BTreeMap`s),
//! so a report roundtrips byte-identically. Artifacts are named by the UTC
//! generation timestamp and are never overwritten.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::VendorRollup;
use crate::error::PipelineError;
use crate::select::BucketCounts;
use crate::summarize::{BoundSource, Insight, Priority, SummaryOutcome};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub items_fetched_per_source: BTreeMap<String, usize>,
    pub items_selected: usize,
    pub buckets: BucketCounts,
    pub llm_tokens_used: u64,
    pub llm_failed: bool,
    /// Insights dropped by source-binding validation.
    pub llm_dropped: usize,
    pub duration_ms: u64,
    /// One line per skipped or degraded source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub executive_summary: String,
    /// alpha first; empty priorities are omitted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub insights_by_priority: BTreeMap<Priority, Vec<Insight>>,
    /// Ordered by SOURCE_ID.
    pub sources: Vec<BoundSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vendor_rollup: Vec<VendorRollup>,
    pub run_stats: RunStats,
}

impl Report {
    pub fn assemble(
        generated_at: DateTime<Utc>,
        summary: SummaryOutcome,
        sources: Vec<BoundSource>,
        vendor_rollup: Vec<VendorRollup>,
        mut run_stats: RunStats,
    ) -> Self {
        let mut insights_by_priority: BTreeMap<Priority, Vec<Insight>> = BTreeMap::new();
        for insight in summary.insights {
            insights_by_priority
                .entry(insight.priority)
                .or_default()
                .push(insight);
        }
        run_stats.llm_failed = summary.llm_failed;
        run_stats.llm_dropped = summary.llm_dropped;
        run_stats.llm_tokens_used = summary.tokens_used;
        Self {
            generated_at,
            executive_summary: summary.executive_summary,
            insights_by_priority,
            sources,
            vendor_rollup,
            run_stats,
        }
    }

    pub fn artifact_name(&self) -> String {
        format!(
            "report_{}.json",
            self.generated_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write the JSON artifact. An existing file with the same name is an
    /// error; a rerun within the same second must not clobber a report.
    pub fn write_json(&self, output_dir: &Path) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(self.artifact_name());
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                PipelineError::Internal(format!(
                    "refusing to overwrite artifact {}: {e}",
                    path.display()
                ))
            })?;
        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarize::{Confidence, Role};
    use chrono::TimeZone;
    use std::collections::{BTreeMap as Map, BTreeSet};

    fn sample() -> Report {
        let insight = Insight {
            text: "VMware +50% [1]".into(),
            priority: Priority::Alpha,
            confidence: Confidence::Medium,
            role: Role::Pricing,
            cited_source_ids: BTreeSet::from([1]),
            citations: Map::from([(1, "https://forum.example/vmware".to_string())]),
            redundant: false,
        };
        let summary = SummaryOutcome {
            insights: vec![insight],
            executive_summary: "Costs are up.".into(),
            llm_failed: false,
            llm_dropped: 0,
            tokens_used: 321,
        };
        Report::assemble(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            summary,
            Vec::new(),
            Vec::new(),
            RunStats::default(),
        )
    }

    #[test]
    fn serialisation_roundtrips() {
        let report = sample();
        let json = serde_json::to_string(&report).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        let rejson = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, rejson);
    }

    #[test]
    fn priorities_group_in_severity_order() {
        let report = sample();
        let first = report.insights_by_priority.keys().next().unwrap();
        assert_eq!(*first, Priority::Alpha);
        assert_eq!(report.run_stats.llm_tokens_used, 321);
    }

    #[test]
    fn artifact_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample();
        report.write_json(dir.path()).unwrap();
        assert!(report.write_json(dir.path()).is_err());
    }

    #[test]
    fn artifact_name_is_timestamped() {
        assert_eq!(sample().artifact_name(), "report_20240601_080000.json");
    }
}
