//! Error taxonomy for the pipeline.
//!
//! Errors are classified by where they stop the run:
//! - Config: fatal before anything is fetched (exit 1)
//! - TotalFetchFailure: fatal after all fetchers report empty (exit 2)
//! - Internal: unrecoverable plumbing failure (exit 3)
//! - Cancelled: caller asked us to stop; no artifacts are written
//!
//! Per-source and LLM failures are soft: they degrade the report and land in
//! `run_stats`, never in this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no items collected from any source")]
    TotalFetchFailure,

    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Per-source fetch failures, aggregated by the orchestrator.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network, HTTP 5xx, 429 — retried with backoff before surfacing.
    #[error("transient failure for {src_name}: {detail}")]
    Transient { src_name: String, detail: String },

    /// Auth failure, non-429 4xx, schema drift — the source is skipped.
    #[error("permanent failure for {src_name}: {detail}")]
    Permanent { src_name: String, detail: String },

    /// The per-source wall clock expired; partial results were kept.
    #[error("source {src_name} timed out after {secs}s")]
    Timeout { src_name: String, secs: u64 },

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn source_name(&self) -> &str {
        match self {
            FetchError::Transient { src_name, .. }
            | FetchError::Permanent { src_name, .. }
            | FetchError::Timeout { src_name, .. } => src_name,
            FetchError::Cancelled => "",
        }
    }
}

impl PipelineError {
    /// Process exit code per the published contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 1,
            PipelineError::TotalFetchFailure => 2,
            PipelineError::Cancelled | PipelineError::Internal(_) => 3,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}
